use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::nlu::{Classification, EntityExtractor, IntentClassifier, MessageExtraction};
use crate::settings::ServiceConfig;

use super::cues::{extract_cues, family_density};
use super::phases::{allowed_next, next_phase};
use super::store::ContextStore;
use super::types::{
    AnalyzedMessage, ContextualCue, ConversationContext, ConversationPhase, CueKind,
    ExtractedIntent, FlowDirection, Momentum, MomentumDirection, Sender, TimingAssessment,
};

/// Turns raw messages into analyzed conversation state. Best-effort and
/// never-blocking: provider failures fall back to neutral defaults.
pub struct ContextAnalyzer {
    store: Arc<ContextStore>,
    extractor: Arc<dyn EntityExtractor>,
    classifier: Arc<dyn IntentClassifier>,
    cue_relevance_threshold: f64,
    optimal_timing_threshold: f64,
}

impl ContextAnalyzer {
    pub fn new(
        store: Arc<ContextStore>,
        extractor: Arc<dyn EntityExtractor>,
        classifier: Arc<dyn IntentClassifier>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            classifier,
            cue_relevance_threshold: config.cue_relevance_threshold,
            optimal_timing_threshold: config.optimal_timing_threshold,
        }
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Analyze one message and fold it into the conversation's context.
    /// Returns a snapshot of the updated context. A client-supplied message
    /// id is kept so history entries stay correlatable; otherwise one is
    /// minted here.
    pub async fn analyze(
        &self,
        content: &str,
        conversation_id: Uuid,
        user_id: &str,
        workspace_id: &str,
        session_id: Uuid,
        message_id: Option<Uuid>,
    ) -> ConversationContext {
        // provider calls happen before the per-conversation lock is taken so
        // no lock is held across provider I/O
        let extraction = match self.extractor.extract(content).await {
            Ok(e) => e,
            Err(e) => {
                warn!(%conversation_id, error = %e, "entity extraction failed, using neutral defaults");
                MessageExtraction::default()
            }
        };
        let classification = match self.classifier.classify(content).await {
            Ok(c) => c,
            Err(e) => {
                warn!(%conversation_id, error = %e, "intent classification failed, using neutral defaults");
                Classification {
                    primary: ExtractedIntent::default(),
                    secondary: None,
                }
            }
        };
        let cues = extract_cues(content, self.cue_relevance_threshold);

        let entry = self
            .store
            .get_or_create(conversation_id, user_id, workspace_id)
            .await;
        let snapshot = {
            let mut ctx = entry.context.lock().await;

            let previous_phase = ctx.flow.current_phase;
            let phase = next_phase(previous_phase, &cues, ctx.flow.messages_in_phase);
            if phase != previous_phase {
                debug!(%conversation_id, ?previous_phase, ?phase, "conversation phase advanced");
                ctx.flow.direction = FlowDirection::Advancing;
                ctx.flow.messages_in_phase = 0;
            } else {
                ctx.flow.direction = FlowDirection::Holding;
                ctx.flow.messages_in_phase += 1;
            }
            ctx.flow.current_phase = phase;
            ctx.flow.predicted_next = allowed_next(phase).to_vec();

            let sentiment = extraction.sentiment.clamp(-1.0, 1.0);
            let message = AnalyzedMessage {
                id: message_id.unwrap_or_else(Uuid::new_v4),
                content: content.to_string(),
                sender: Sender::User,
                entities: extraction.entities,
                sentiment,
                tool_mentions: extraction.tool_mentions,
                primary_intent: bounded(classification.primary),
                secondary_intent: classification.secondary.map(bounded),
                created_at: Utc::now(),
            };

            ctx.intent = message.primary_intent.clone();
            ctx.cues = cues;
            ctx.history.push(message);
            ctx.timing = self.assess_timing(&ctx.cues, phase);
            ctx.momentum = momentum_from_trend(&ctx.recent_sentiment(5));
            ctx.last_activity = Utc::now();
            ctx.clone()
        };
        entry.touch();

        debug!(
            %conversation_id,
            %session_id,
            phase = ?snapshot.flow.current_phase,
            intent = ?snapshot.intent.category,
            timing = snapshot.timing.score,
            "analyzed message"
        );

        // opportunistic maintenance keeps the store bounded without a
        // dedicated timer in the analyzer
        self.store.maintain().await;
        snapshot
    }

    /// Combine cue density, urgency indicators, and phase into a single
    /// is-this-the-right-moment score.
    fn assess_timing(&self, cues: &[ContextualCue], phase: ConversationPhase) -> TimingAssessment {
        let density = family_density(cues);
        let urgency = cues
            .iter()
            .filter(|c| c.kind == CueKind::Temporal || c.kind == CueKind::UserState)
            .map(|c| c.relevance)
            .fold(0.0, f64::max);
        let score = (0.45 * density + 0.3 * urgency + 0.25 * phase_weight(phase)).clamp(0.0, 1.0);
        TimingAssessment {
            score,
            optimal: score >= self.optimal_timing_threshold,
        }
    }
}

fn bounded(mut intent: ExtractedIntent) -> ExtractedIntent {
    intent.confidence = intent.confidence.clamp(0.0, 1.0);
    intent
}

fn phase_weight(phase: ConversationPhase) -> f64 {
    use ConversationPhase::*;
    match phase {
        Opening => 0.2,
        Exploration => 0.5,
        TaskFocus => 0.9,
        Execution => 0.8,
        Refinement => 0.6,
        Wrap => 0.2,
    }
}

fn momentum_from_trend(sentiments: &[f64]) -> Momentum {
    if sentiments.is_empty() {
        return Momentum::default();
    }
    let mean = sentiments.iter().sum::<f64>() / sentiments.len() as f64;
    let energy = (0.5 + mean * 0.5).clamp(0.0, 1.0);
    let direction = if sentiments.len() < 2 {
        MomentumDirection::Steady
    } else {
        let last = sentiments[sentiments.len() - 1];
        let earlier = &sentiments[..sentiments.len() - 1];
        let earlier_mean = earlier.iter().sum::<f64>() / earlier.len() as f64;
        let delta = last - earlier_mean;
        if delta > 0.1 {
            MomentumDirection::Rising
        } else if delta < -0.1 {
            MomentumDirection::Falling
        } else {
            MomentumDirection::Steady
        }
    };
    Momentum { energy, direction }
}
