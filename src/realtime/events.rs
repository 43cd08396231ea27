use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::types::IntentCategory;
use crate::recommend::types::{FeedbackType, ToolRecommendation, Urgency};
use crate::settings::PreferencesPatch;
use crate::workflow::{WorkflowRecommendationResponse, WorkflowState};

/// Client-to-service events. Optional fields default rather than reject so a
/// sparse payload never fails the session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    UserMessage {
        content: String,
        #[serde(default)]
        message_id: Option<Uuid>,
    },
    RequestRecommendations {
        #[serde(default)]
        request_id: Option<Uuid>,
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        urgency: Urgency,
        #[serde(default)]
        include_workflow: bool,
        #[serde(default)]
        workflow: Option<WorkflowState>,
        #[serde(default)]
        max_recommendations: Option<usize>,
        #[serde(default)]
        category: Option<IntentCategory>,
    },
    SelectRecommendation {
        recommendation_id: Uuid,
        #[serde(default)]
        confidence: Option<f64>,
    },
    DismissRecommendation {
        recommendation_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },
    ProvideFeedback {
        #[serde(default)]
        feedback_id: Option<Uuid>,
        recommendation_id: Uuid,
        #[serde(default)]
        feedback_type: FeedbackType,
        #[serde(default)]
        value: Option<f64>,
    },
    UpdatePreferences {
        #[serde(flatten)]
        patch: PreferencesPatch,
    },
    Heartbeat {},
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionMetrics {
    pub messages_handled: u64,
    pub recommendations_served: u64,
    pub cache_hits: u64,
    pub fallbacks_served: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    RecommendationsAvailable {
        bundle_id: Uuid,
        recommendations: Vec<ToolRecommendation>,
        contextual_explanation: String,
        confidence: f64,
        expires_at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        workflow: Option<WorkflowRecommendationResponse>,
    },
    RecommendationUpdate {
        recommendation_id: Uuid,
        update: serde_json::Value,
    },
    RecommendationExpired {
        recommendation_id: Uuid,
    },
    SystemStatus {
        service_health: String,
        response_time_ms: u64,
        error_rate: f64,
        active_connections: usize,
    },
    Error {
        error: String,
        code: String,
    },
    RecommendationReceived {
        bundle_id: Uuid,
    },
    PerformanceMetrics {
        #[serde(flatten)]
        metrics: SessionMetrics,
    },
}
