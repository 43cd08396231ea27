pub mod score;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::ToolCatalog;
use crate::context::ContextAnalyzer;
use crate::context::types::ConversationContext;
use crate::error::{Result, ServiceError};
use crate::learning::LearningStore;
use crate::settings::ServiceConfig;

use score::score_tool;
use types::{
    FeedbackEvent, RecommendationRequest, RecommendationResponse, SelectionEvent,
    ToolRecommendation,
};

/// Turns analyzed context plus the tool catalog into ranked, explained
/// recommendation bundles, and feeds the learning loop.
pub struct RecommendationOrchestrator {
    analyzer: Arc<ContextAnalyzer>,
    catalog: Arc<dyn ToolCatalog>,
    learning: Arc<dyn LearningStore>,
    bundle_ttl_secs: i64,
}

impl RecommendationOrchestrator {
    pub fn new(
        analyzer: Arc<ContextAnalyzer>,
        catalog: Arc<dyn ToolCatalog>,
        learning: Arc<dyn LearningStore>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            analyzer,
            catalog,
            learning,
            bundle_ttl_secs: config.cache_timeout_secs as i64,
        }
    }

    pub async fn request_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        let context = self.resolve_context(request).await?;

        let candidates = match request.category_filter {
            Some(category) => self.catalog.by_category(category).await?,
            None => self.catalog.all().await?,
        };

        let mut scored = Vec::with_capacity(candidates.len());
        for tool in &candidates {
            let effectiveness = match self.learning.effectiveness(&tool.id).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(tool_id = %tool.id, error = %e, "effectiveness lookup failed");
                    None
                }
            };
            scored.push(score_tool(tool, &context, effectiveness));
        }

        scored.retain(|s| s.confidence >= request.confidence_threshold);
        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen: HashSet<String> = HashSet::new();
        let mut recommendations = Vec::new();
        for s in scored {
            if recommendations.len() >= request.max_recommendations {
                break;
            }
            if !seen.insert(s.tool.id.clone()) {
                continue;
            }
            recommendations.push(ToolRecommendation {
                id: Uuid::new_v4(),
                tool_id: s.tool.id.clone(),
                tool_name: s.tool.name.clone(),
                confidence: s.confidence,
                reasoning: s.reasoning,
                quick_actions: s.tool.quick_actions.clone(),
                workflow_relevance: None,
                stage_alignment: None,
            });
        }

        let confidence = if recommendations.is_empty() {
            0.0
        } else {
            recommendations.iter().map(|r| r.confidence).sum::<f64>()
                / recommendations.len() as f64
        };

        let now = Utc::now();
        let response = RecommendationResponse {
            bundle_id: Uuid::new_v4(),
            conversation_id: request.conversation_id,
            contextual_explanation: explain(&context, recommendations.len()),
            recommendations,
            confidence,
            generated_at: now,
            expires_at: now + ChronoDuration::seconds(self.bundle_ttl_secs),
            fallback: false,
        };

        if let Err(e) = self.learning.record_response(&response).await {
            warn!(bundle_id = %response.bundle_id, error = %e, "failed to record response for learning");
        }
        counter!("recommendations_generated_total").increment(1);
        debug!(
            bundle_id = %response.bundle_id,
            conversation_id = %request.conversation_id,
            count = response.recommendations.len(),
            confidence = response.confidence,
            "generated recommendation bundle"
        );
        Ok(response)
    }

    /// Side-effect only; malformed optional fields were already defaulted at
    /// the event boundary, and store failures are swallowed with a warning.
    pub async fn record_selection(&self, event: SelectionEvent) {
        if let Err(e) = self.learning.record_selection(event).await {
            warn!(error = %e, "failed to record selection event");
        }
    }

    pub async fn record_feedback(&self, event: FeedbackEvent) {
        if let Err(e) = self.learning.record_feedback(event).await {
            warn!(error = %e, "failed to record feedback event");
        }
    }

    async fn resolve_context(
        &self,
        request: &RecommendationRequest,
    ) -> Result<ConversationContext> {
        if let Some(message) = &request.message {
            return Ok(self
                .analyzer
                .analyze(
                    message,
                    request.conversation_id,
                    &request.user_id,
                    &request.workspace_id,
                    request.session_id,
                    None,
                )
                .await);
        }
        if let Some(ctx) = &request.context {
            return Ok(ctx.clone());
        }
        self.analyzer
            .store()
            .snapshot(request.conversation_id)
            .await
            .ok_or(ServiceError::ConversationNotFound(request.conversation_id))
    }
}

fn explain(context: &ConversationContext, count: usize) -> String {
    if count == 0 {
        return "No tools cleared the confidence bar for this conversation yet.".to_string();
    }
    format!(
        "Based on your {:?} intent during the {:?} phase, {} tool{} look{} relevant right now.",
        context.intent.category,
        context.flow.current_phase,
        count,
        if count == 1 { "" } else { "s" },
        if count == 1 { "s" } else { "" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StaticCatalog, UnavailableCatalog};
    use crate::context::ContextStore;
    use crate::context::types::IntentCategory;
    use crate::learning::NullLearningStore;
    use crate::nlu::LexiconNlu;
    use crate::recommend::types::Urgency;

    fn orchestrator(catalog: Arc<dyn ToolCatalog>) -> RecommendationOrchestrator {
        let config = ServiceConfig::default();
        let store = Arc::new(ContextStore::new(&config));
        let nlu = Arc::new(LexiconNlu);
        let analyzer = Arc::new(ContextAnalyzer::new(store, nlu.clone(), nlu, &config));
        RecommendationOrchestrator::new(analyzer, catalog, Arc::new(NullLearningStore), &config)
    }

    fn request(message: &str, max: usize, threshold: f64) -> RecommendationRequest {
        RecommendationRequest {
            conversation_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            user_id: "u1".into(),
            workspace_id: "w1".into(),
            message: Some(message.into()),
            context: None,
            urgency: Urgency::Normal,
            category_filter: None,
            max_recommendations: max,
            confidence_threshold: threshold,
        }
    }

    #[tokio::test]
    async fn respects_max_and_has_no_duplicate_tools() {
        let orch = orchestrator(Arc::new(StaticCatalog::with_default_tools()));
        let req = request("analyze the csv and generate a report", 2, 0.0);
        let resp = orch.request_recommendations(&req).await.unwrap();
        assert!(resp.recommendations.len() <= 2);
        let mut ids: Vec<&str> = resp.recommendations.iter().map(|r| r.tool_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), resp.recommendations.len());
    }

    #[tokio::test]
    async fn entries_sorted_descending() {
        let orch = orchestrator(Arc::new(StaticCatalog::with_default_tools()));
        let req = request("analyze the csv data and create a summary report", 5, 0.0);
        let resp = orch.request_recommendations(&req).await.unwrap();
        for w in resp.recommendations.windows(2) {
            assert!(w[0].confidence >= w[1].confidence);
        }
    }

    #[tokio::test]
    async fn overall_confidence_is_mean_of_entries() {
        let orch = orchestrator(Arc::new(StaticCatalog::with_default_tools()));
        let req = request("run the export tool", 5, 0.0);
        let resp = orch.request_recommendations(&req).await.unwrap();
        assert!(!resp.recommendations.is_empty());
        let mean = resp.recommendations.iter().map(|r| r.confidence).sum::<f64>()
            / resp.recommendations.len() as f64;
        assert!((resp.confidence - mean).abs() < 1e-9);
    }

    #[tokio::test]
    async fn threshold_filters_low_confidence() {
        let orch = orchestrator(Arc::new(StaticCatalog::with_default_tools()));
        let req = request("hello", 10, 0.99);
        let resp = orch.request_recommendations(&req).await.unwrap();
        assert!(resp.recommendations.is_empty());
        assert!(!resp.contextual_explanation.is_empty());
    }

    #[tokio::test]
    async fn category_filter_limits_candidates() {
        let orch = orchestrator(Arc::new(StaticCatalog::with_default_tools()));
        let mut req = request("fix the broken run", 10, 0.0);
        req.category_filter = Some(IntentCategory::Troubleshooting);
        let resp = orch.request_recommendations(&req).await.unwrap();
        assert!(resp.recommendations.iter().all(|r| r.tool_id == "diagnostics"));
    }

    #[tokio::test]
    async fn catalog_outage_is_explicit_error() {
        let orch = orchestrator(Arc::new(UnavailableCatalog));
        let req = request("analyze this", 3, 0.0);
        let err = orch.request_recommendations(&req).await.unwrap_err();
        assert_eq!(err.code(), "catalog_unavailable");
    }

    #[tokio::test]
    async fn missing_context_without_message_is_error() {
        let orch = orchestrator(Arc::new(StaticCatalog::with_default_tools()));
        let mut req = request("x", 3, 0.0);
        req.message = None;
        let err = orch.request_recommendations(&req).await.unwrap_err();
        assert_eq!(err.code(), "conversation_not_found");
    }

    #[tokio::test]
    async fn record_selection_never_errors() {
        let orch = orchestrator(Arc::new(StaticCatalog::with_default_tools()));
        orch.record_selection(SelectionEvent {
            recommendation_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            confidence: 0.5,
            dismissed: false,
            reason: None,
            created_at: Utc::now(),
        })
        .await;
    }
}
