use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::types::{Complexity, Entity, ExtractedIntent, IntentCategory};

#[derive(Debug, Clone, Default)]
pub struct MessageExtraction {
    pub entities: Vec<Entity>,
    /// Bounded [-1, 1].
    pub sentiment: f64,
    pub tool_mentions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub primary: ExtractedIntent,
    pub secondary: Option<ExtractedIntent>,
}

/// Entity/sentiment/tool-mention extraction boundary. Implementations must
/// bound sentiment to [-1, 1]; callers recover from errors with neutral
/// defaults.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, content: &str) -> anyhow::Result<MessageExtraction>;
}

/// Intent classification boundary. Confidence must be bounded [0, 1].
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, content: &str) -> anyhow::Result<Classification>;
}

const CATEGORY_LEXICON: &[(IntentCategory, &[&str], &[&str])] = &[
    (
        IntentCategory::TaskExecution,
        &["run", "execute", "create", "generate", "build", "make", "convert", "export", "automate", "need to"],
        &["execute", "transform"],
    ),
    (
        IntentCategory::AnalysisReporting,
        &["analyze", "analyse", "report", "summary", "summarize", "chart", "metric", "insight", "csv", "data"],
        &["analyze", "report"],
    ),
    (
        IntentCategory::InformationSeeking,
        &["what", "how", "where", "explain", "tell me", "show me", "find", "search", "look up"],
        &["search", "retrieve"],
    ),
    (
        IntentCategory::Troubleshooting,
        &["error", "broken", "fail", "bug", "fix", "not working", "crash", "issue", "wrong"],
        &["diagnose", "repair"],
    ),
    (
        IntentCategory::Configuration,
        &["configure", "setting", "setup", "install", "enable", "disable", "permission", "connect"],
        &["configure"],
    ),
    (
        IntentCategory::Collaboration,
        &["share", "invite", "team", "assign", "review", "comment", "collaborate"],
        &["share", "notify"],
    ),
];

const TOOL_MENTION_WORDS: &[&str] = &[
    "spreadsheet", "csv", "report", "dashboard", "calendar", "email", "chart",
    "database", "api", "script", "template", "export", "scheduler",
];

/// Deterministic keyword-lexicon NLU used as the default provider and as the
/// test fake. Scores each category by keyword hits over the message.
#[derive(Debug, Clone, Default)]
pub struct LexiconNlu;

impl LexiconNlu {
    fn score_categories(content: &str) -> Vec<(IntentCategory, f64, Vec<String>)> {
        let lower = content.to_lowercase();
        let mut scored = Vec::new();
        for (cat, keywords, caps) in CATEGORY_LEXICON {
            let hits = keywords.iter().filter(|k| lower.contains(**k)).count();
            if hits == 0 {
                continue;
            }
            // two keyword hits already make a confident call
            let confidence = (0.4 + 0.25 * hits as f64).min(0.95);
            scored.push((
                *cat,
                confidence,
                caps.iter().map(|c| c.to_string()).collect(),
            ));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn complexity_of(content: &str) -> Complexity {
        let words = content.split_whitespace().count();
        let conjunctions = ["and", "then", "also", "plus"]
            .iter()
            .filter(|c| content.to_lowercase().contains(**c))
            .count();
        if words > 25 || conjunctions >= 2 {
            Complexity::Complex
        } else if words > 10 || conjunctions == 1 {
            Complexity::Moderate
        } else {
            Complexity::Simple
        }
    }
}

#[async_trait]
impl EntityExtractor for LexiconNlu {
    async fn extract(&self, content: &str) -> anyhow::Result<MessageExtraction> {
        let lower = content.to_lowercase();
        let mut entities = Vec::new();
        for word in lower.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '.');
            if word.ends_with(".csv") || word.ends_with(".xlsx") || word.ends_with(".json") {
                entities.push(Entity {
                    kind: "file".into(),
                    text: word.to_string(),
                });
            }
        }
        for artifact in ["csv", "report", "dashboard", "spreadsheet", "database"] {
            if lower.contains(artifact) {
                entities.push(Entity {
                    kind: "artifact".into(),
                    text: artifact.to_string(),
                });
            }
        }

        let positive = ["great", "thanks", "perfect", "awesome", "good", "love"];
        let negative = ["broken", "frustrat", "annoying", "bad", "hate", "stuck", "wrong"];
        let pos = positive.iter().filter(|w| lower.contains(**w)).count() as f64;
        let neg = negative.iter().filter(|w| lower.contains(**w)).count() as f64;
        let sentiment = ((pos - neg) * 0.4).clamp(-1.0, 1.0);

        let tool_mentions = TOOL_MENTION_WORDS
            .iter()
            .filter(|w| lower.contains(**w))
            .map(|w| w.to_string())
            .collect();

        Ok(MessageExtraction {
            entities,
            sentiment,
            tool_mentions,
        })
    }
}

#[async_trait]
impl IntentClassifier for LexiconNlu {
    async fn classify(&self, content: &str) -> anyhow::Result<Classification> {
        let scored = Self::score_categories(content);
        let complexity = Self::complexity_of(content);
        let mut iter = scored.into_iter();
        let primary = match iter.next() {
            Some((category, confidence, required_capabilities)) => ExtractedIntent {
                category,
                confidence,
                complexity,
                required_capabilities,
            },
            None => ExtractedIntent {
                category: IntentCategory::Unknown,
                confidence: 0.2,
                complexity,
                required_capabilities: Vec::new(),
            },
        };
        let secondary = iter.next().map(|(category, confidence, required_capabilities)| {
            ExtractedIntent {
                category,
                confidence,
                complexity,
                required_capabilities,
            }
        });
        Ok(Classification { primary, secondary })
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    category: IntentCategory,
    confidence: f64,
    #[serde(default)]
    capabilities: Vec<String>,
}

/// Intent classifier backed by an external HTTP model endpoint. Failures are
/// surfaced as errors; the analyzer recovers with neutral defaults.
#[derive(Clone)]
pub struct HttpIntentClassifier {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpIntentClassifier {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(base_url)?;
        if parsed.host_str().is_none() {
            anyhow::bail!("classifier endpoint has no host");
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(3))
                .build()?,
        })
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("TOOLPILOT_CLASSIFIER_URL").ok()?;
        let api_key = std::env::var("TOOLPILOT_CLASSIFIER_KEY").ok();
        Self::new(&base_url, api_key).ok()
    }
}

#[async_trait]
impl IntentClassifier for HttpIntentClassifier {
    async fn classify(&self, content: &str) -> anyhow::Result<Classification> {
        let url = format!("{}/v1/classify", self.base_url);
        let mut rb = self.client.post(url).json(&ClassifyRequest { text: content });
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("classifier call failed: {}", resp.status());
        }
        let v: ClassifyResponse = resp.json().await?;
        Ok(Classification {
            primary: ExtractedIntent {
                category: v.category,
                confidence: v.confidence.clamp(0.0, 1.0),
                complexity: LexiconNlu::complexity_of(content),
                required_capabilities: v.capabilities,
            },
            secondary: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn csv_summary_message_classifies_as_task_or_analysis() {
        let nlu = LexiconNlu;
        let c = nlu
            .classify("I need to analyze this CSV file and create a summary report")
            .await
            .unwrap();
        assert!(matches!(
            c.primary.category,
            IntentCategory::TaskExecution | IntentCategory::AnalysisReporting
        ));
        assert!(c.primary.confidence >= 0.6);
    }

    #[tokio::test]
    async fn confidence_always_bounded() {
        let nlu = LexiconNlu;
        let long = "analyze analyse report summary summarize chart metric insight csv data";
        let c = nlu.classify(long).await.unwrap();
        assert!((0.0..=1.0).contains(&c.primary.confidence));
    }

    #[tokio::test]
    async fn unknown_when_no_keywords_match() {
        let nlu = LexiconNlu;
        let c = nlu.classify("zzz qqq").await.unwrap();
        assert_eq!(c.primary.category, IntentCategory::Unknown);
        assert!(c.primary.confidence < 0.5);
    }

    #[tokio::test]
    async fn secondary_intent_populated_on_mixed_message() {
        let nlu = LexiconNlu;
        let c = nlu
            .classify("run the export and then fix the broken report error")
            .await
            .unwrap();
        assert!(c.secondary.is_some());
    }

    #[tokio::test]
    async fn extraction_bounds_sentiment() {
        let nlu = LexiconNlu;
        let e = nlu
            .extract("hate hate broken bad wrong annoying stuck")
            .await
            .unwrap();
        assert!((-1.0..=1.0).contains(&e.sentiment));
        assert!(e.sentiment < 0.0);
    }

    #[tokio::test]
    async fn extraction_finds_file_entities_and_tool_mentions() {
        let nlu = LexiconNlu;
        let e = nlu.extract("load sales.csv into the dashboard").await.unwrap();
        assert!(e.entities.iter().any(|x| x.kind == "file" && x.text == "sales.csv"));
        assert!(e.tool_mentions.iter().any(|m| m == "dashboard"));
    }

    #[test]
    fn http_classifier_rejects_invalid_url() {
        assert!(HttpIntentClassifier::new("not a url", None).is_err());
    }
}
