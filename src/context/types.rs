use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    TaskExecution,
    AnalysisReporting,
    InformationSeeking,
    Troubleshooting,
    Configuration,
    Collaboration,
    SmallTalk,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedIntent {
    pub category: IntentCategory,
    pub confidence: f64,
    pub complexity: Complexity,
    pub required_capabilities: Vec<String>,
}

impl Default for ExtractedIntent {
    fn default() -> Self {
        Self {
            category: IntentCategory::Unknown,
            confidence: 0.0,
            complexity: Complexity::Simple,
            required_capabilities: Vec::new(),
        }
    }
}

/// Fixed conversation phases. Transitions only move forward along each
/// phase's allowed-next set (see `phases::next_phase`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Opening,
    Exploration,
    TaskFocus,
    Execution,
    Refinement,
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Advancing,
    Holding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationFlow {
    pub current_phase: ConversationPhase,
    pub direction: FlowDirection,
    pub predicted_next: Vec<ConversationPhase>,
    /// Messages handled since the phase last changed; feeds the
    /// elapsed-message transition heuristic.
    pub messages_in_phase: usize,
}

impl Default for ConversationFlow {
    fn default() -> Self {
        Self {
            current_phase: ConversationPhase::Opening,
            direction: FlowDirection::Holding,
            predicted_next: vec![ConversationPhase::Exploration],
            messages_in_phase: 0,
        }
    }
}

/// The five cue families that influence recommendation timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    Temporal,
    Workflow,
    ToolReference,
    UserState,
    Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextualCue {
    pub kind: CueKind,
    pub signal: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TimingAssessment {
    pub score: f64,
    pub optimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumDirection {
    Rising,
    Steady,
    Falling,
}

/// Engagement/frustration signal derived from the recent sentiment trend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Momentum {
    pub energy: f64,
    pub direction: MomentumDirection,
}

impl Default for Momentum {
    fn default() -> Self {
        Self {
            energy: 0.5,
            direction: MomentumDirection::Steady,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: String,
    pub text: String,
}

/// Immutable once created; appended to its conversation's history and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedMessage {
    pub id: Uuid,
    pub content: String,
    pub sender: Sender,
    pub entities: Vec<Entity>,
    pub sentiment: f64,
    pub tool_mentions: Vec<String>,
    pub primary_intent: ExtractedIntent,
    pub secondary_intent: Option<ExtractedIntent>,
    pub created_at: DateTime<Utc>,
}

/// Accumulated analysis state for one conversation. Created on first message,
/// mutated in place on every subsequent message, evicted by the store's
/// retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub workspace_id: String,
    pub history: Vec<AnalyzedMessage>,
    pub intent: ExtractedIntent,
    pub flow: ConversationFlow,
    pub cues: Vec<ContextualCue>,
    pub timing: TimingAssessment,
    pub momentum: Momentum,
    pub last_activity: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(conversation_id: Uuid, user_id: &str, workspace_id: &str) -> Self {
        Self {
            conversation_id,
            user_id: user_id.to_string(),
            workspace_id: workspace_id.to_string(),
            history: Vec::new(),
            intent: ExtractedIntent::default(),
            flow: ConversationFlow::default(),
            cues: Vec::new(),
            timing: TimingAssessment::default(),
            momentum: Momentum::default(),
            last_activity: Utc::now(),
        }
    }

    /// Recent sentiment values, oldest first, capped at `n`.
    pub fn recent_sentiment(&self, n: usize) -> Vec<f64> {
        let start = self.history.len().saturating_sub(n);
        self.history[start..].iter().map(|m| m.sentiment).collect()
    }
}
