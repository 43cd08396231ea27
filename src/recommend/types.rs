use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::types::{ConversationContext, IntentCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub conversation_id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub workspace_id: String,
    /// Fresh message to analyze before recommending, if any.
    pub message: Option<String>,
    /// Snapshot to use when no fresh message is supplied.
    pub context: Option<ConversationContext>,
    pub urgency: Urgency,
    pub category_filter: Option<IntentCategory>,
    pub max_recommendations: usize,
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecommendation {
    pub id: Uuid,
    pub tool_id: String,
    pub tool_name: String,
    pub confidence: f64,
    /// Human-readable reasoning for the suggestion.
    pub reasoning: String,
    pub quick_actions: Vec<String>,
    /// Set by the workflow augmentation layer.
    pub workflow_relevance: Option<f64>,
    pub stage_alignment: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub bundle_id: Uuid,
    pub conversation_id: Uuid,
    pub recommendations: Vec<ToolRecommendation>,
    pub contextual_explanation: String,
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True when this bundle came from the degraded fallback path.
    pub fallback: bool,
}

/// Immutable audit record of a user acting on a recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionEvent {
    pub recommendation_id: Uuid,
    pub session_id: Uuid,
    /// Defaults to 0.5 when the client omits it.
    pub confidence: f64,
    pub dismissed: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Helpful,
    NotHelpful,
    #[default]
    Neutral,
}

/// Immutable audit record of how a recommendation performed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub feedback_id: Uuid,
    pub recommendation_id: Uuid,
    pub session_id: Uuid,
    pub feedback_type: FeedbackType,
    /// Bounded [0, 1]; defaults to 0.5 when omitted.
    pub value: f64,
    pub created_at: DateTime<Utc>,
}
