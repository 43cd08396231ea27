use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::{ToolCatalog, ToolSpec};
use crate::context::types::ConversationContext;
use crate::recommend::score::score_tool;
use crate::recommend::types::ToolRecommendation;
use crate::settings::ServiceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub name: String,
    pub status: StageStatus,
    /// Bounded [0, 1].
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub stages: Vec<WorkflowStage>,
    pub current_stage: String,
    pub data_quality: f64,
    pub resource_availability: f64,
    pub efficiency: f64,
}

impl WorkflowState {
    /// A state is usable when its current stage exists and its health values
    /// are in range. Anything else degrades to an empty augmentation.
    fn is_well_formed(&self) -> bool {
        self.stages.iter().any(|s| s.name == self.current_stage)
            && (0.0..=1.0).contains(&self.data_quality)
            && (0.0..=1.0).contains(&self.resource_availability)
            && (0.0..=1.0).contains(&self.efficiency)
            && self.stages.iter().all(|s| (0.0..=1.0).contains(&s.progress))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAnalysis {
    pub stage_progress: f64,
    pub data_quality: f64,
    pub resource_availability: f64,
    /// Composite of progress and data quality for the active stage.
    pub stage_health: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub tool_id: String,
    pub order: usize,
    /// Steps sharing a group may run in parallel.
    pub parallel_group: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSequence {
    pub steps: Vec<SequenceStep>,
    pub success_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePreparation {
    pub stage: String,
    pub hint: String,
    pub tool_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mitigation {
    pub strategy: String,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub description: String,
    pub severity: f64,
    pub mitigations: Vec<Mitigation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowRecommendationResponse {
    pub recommendations: Vec<ToolRecommendation>,
    pub sequences: Vec<ToolSequence>,
    pub upcoming: Vec<StagePreparation>,
    pub bottlenecks: Vec<Bottleneck>,
    pub analysis: Option<WorkflowAnalysis>,
    pub confidence: f64,
}

const MAX_IMMEDIATE: usize = 5;
const MAX_UPCOMING_STAGES: usize = 3;

/// Adds stage and sequence awareness on top of the base recommendations.
pub struct WorkflowAdvisor {
    catalog: Arc<dyn ToolCatalog>,
    resource_threshold: f64,
    quality_threshold: f64,
}

impl WorkflowAdvisor {
    pub fn new(catalog: Arc<dyn ToolCatalog>, config: &ServiceConfig) -> Self {
        Self {
            catalog,
            resource_threshold: config.bottleneck_resource_threshold,
            quality_threshold: config.bottleneck_quality_threshold,
        }
    }

    /// Augment a recommendation pass with workflow awareness. Degrades to an
    /// empty response when the state is absent, malformed, or the catalog is
    /// down; never fails the surrounding request.
    pub async fn augment(
        &self,
        context: &ConversationContext,
        state: Option<&WorkflowState>,
    ) -> WorkflowRecommendationResponse {
        let Some(state) = state else {
            return WorkflowRecommendationResponse::default();
        };
        if !state.is_well_formed() {
            warn!(workflow_id = %state.workflow_id, "malformed workflow state, skipping augmentation");
            return WorkflowRecommendationResponse::default();
        }

        let tools = match self.catalog.all().await {
            Ok(t) => t,
            Err(e) => {
                warn!(workflow_id = %state.workflow_id, error = %e, "catalog unavailable during augmentation");
                return WorkflowRecommendationResponse::default();
            }
        };

        let analysis = analyze_health(state);
        let stage_tools: Vec<&ToolSpec> = tools
            .iter()
            .filter(|t| t.stages.contains(&state.current_stage))
            .collect();

        let mut recommendations: Vec<ToolRecommendation> = stage_tools
            .iter()
            .map(|tool| {
                let base = score_tool(tool, context, None);
                let stage_alignment = stage_alignment(tool);
                let data_compat = data_compatibility(tool, state);
                let relevance =
                    (0.5 * stage_alignment + 0.3 * data_compat + 0.2 * base.confidence).clamp(0.0, 1.0);
                ToolRecommendation {
                    id: Uuid::new_v4(),
                    tool_id: tool.id.clone(),
                    tool_name: tool.name.clone(),
                    confidence: base.confidence,
                    reasoning: format!(
                        "{} fits the {} stage of this workflow",
                        tool.name, state.current_stage
                    ),
                    quick_actions: tool.quick_actions.clone(),
                    workflow_relevance: Some(relevance),
                    stage_alignment: Some(stage_alignment),
                }
            })
            .collect();
        recommendations.sort_by(|a, b| {
            let ka = a.workflow_relevance.unwrap_or(0.0) + a.confidence;
            let kb = b.workflow_relevance.unwrap_or(0.0) + b.confidence;
            kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
        });
        recommendations.truncate(MAX_IMMEDIATE);

        let sequences = build_sequences(&stage_tools, state);
        let upcoming = upcoming_preparations(&tools, state);
        let bottlenecks = self.detect_bottlenecks(state);

        let immediate_confidence = if recommendations.is_empty() {
            0.0
        } else {
            recommendations.iter().map(|r| r.confidence).sum::<f64>()
                / recommendations.len() as f64
        };
        let sequence_probability = sequences
            .first()
            .map(|s| s.success_probability)
            .unwrap_or(immediate_confidence);
        let health_component = analysis.stage_health * state.efficiency;
        let confidence =
            ((immediate_confidence + sequence_probability + health_component) / 3.0).clamp(0.0, 1.0);

        debug!(
            workflow_id = %state.workflow_id,
            stage = %state.current_stage,
            recommendations = recommendations.len(),
            sequences = sequences.len(),
            bottlenecks = bottlenecks.len(),
            "workflow augmentation complete"
        );

        WorkflowRecommendationResponse {
            recommendations,
            sequences,
            upcoming,
            bottlenecks,
            analysis: Some(analysis),
            confidence,
        }
    }

    fn detect_bottlenecks(&self, state: &WorkflowState) -> Vec<Bottleneck> {
        let mut out = Vec::new();
        if state.resource_availability < self.resource_threshold {
            out.push(Bottleneck {
                description: format!(
                    "resource availability at {:.0}% for stage {}",
                    state.resource_availability * 100.0,
                    state.current_stage
                ),
                severity: 1.0 - state.resource_availability,
                mitigations: vec![
                    Mitigation {
                        strategy: "defer non-critical automation until resources recover".into(),
                        effectiveness: 0.7,
                    },
                    Mitigation {
                        strategy: "queue remaining steps for off-peak execution".into(),
                        effectiveness: 0.6,
                    },
                ],
            });
        }
        if state.data_quality < self.quality_threshold {
            out.push(Bottleneck {
                description: format!(
                    "data quality at {:.0}% entering stage {}",
                    state.data_quality * 100.0,
                    state.current_stage
                ),
                severity: 1.0 - state.data_quality,
                mitigations: vec![Mitigation {
                    strategy: "run a validation pass before continuing the stage".into(),
                    effectiveness: 0.8,
                }],
            });
        }
        out
    }
}

fn analyze_health(state: &WorkflowState) -> WorkflowAnalysis {
    let stage_progress = state
        .stages
        .iter()
        .find(|s| s.name == state.current_stage)
        .map(|s| s.progress)
        .unwrap_or(0.0);
    WorkflowAnalysis {
        stage_progress,
        data_quality: state.data_quality,
        resource_availability: state.resource_availability,
        stage_health: (0.5 * stage_progress + 0.5 * state.data_quality).clamp(0.0, 1.0),
    }
}

fn stage_alignment(tool: &ToolSpec) -> f64 {
    // tools dedicated to fewer stages align more tightly with the one at hand
    match tool.stages.len() {
        0 => 0.0,
        1 => 1.0,
        n => (1.0 / n as f64) + 0.4,
    }
    .clamp(0.0, 1.0)
}

fn data_compatibility(tool: &ToolSpec, state: &WorkflowState) -> f64 {
    // transform-capable tools tolerate lower-quality input
    if tool.capabilities.iter().any(|c| c == "transform" || c == "repair") {
        (state.data_quality + 0.3).clamp(0.0, 1.0)
    } else {
        state.data_quality
    }
}

/// Order stage-compatible tools into a completion sequence: retrieval first,
/// then analysis, then execution/reporting, then sharing. Tools in the same
/// band form a parallelizable group.
fn build_sequences(stage_tools: &[&ToolSpec], state: &WorkflowState) -> Vec<ToolSequence> {
    if stage_tools.len() < 2 {
        return Vec::new();
    }
    let band = |tool: &ToolSpec| -> usize {
        if tool.capabilities.iter().any(|c| c == "retrieve" || c == "search") {
            0
        } else if tool.capabilities.iter().any(|c| c == "analyze" || c == "diagnose") {
            1
        } else if tool.capabilities.iter().any(|c| c == "execute" || c == "report" || c == "transform") {
            2
        } else {
            3
        }
    };
    let mut ordered: Vec<(&&ToolSpec, usize)> = stage_tools.iter().map(|t| (t, band(t))).collect();
    ordered.sort_by_key(|(_, b)| *b);
    let steps: Vec<SequenceStep> = ordered
        .iter()
        .enumerate()
        .map(|(i, (tool, band))| SequenceStep {
            tool_id: tool.id.clone(),
            order: i,
            parallel_group: *band,
        })
        .collect();
    // each extra step compounds risk; degraded data lowers the odds further
    let success_probability =
        (0.95_f64.powi(steps.len() as i32) * (0.5 + 0.5 * state.data_quality)).clamp(0.0, 1.0);
    vec![ToolSequence {
        steps,
        success_probability,
    }]
}

fn upcoming_preparations(tools: &[ToolSpec], state: &WorkflowState) -> Vec<StagePreparation> {
    state
        .stages
        .iter()
        .filter(|s| s.status == StageStatus::Pending)
        .take(MAX_UPCOMING_STAGES)
        .map(|stage| {
            let tool_ids: Vec<String> = tools
                .iter()
                .filter(|t| t.stages.contains(&stage.name))
                .map(|t| t.id.clone())
                .collect();
            StagePreparation {
                hint: format!("Stage {} is coming up; have its tools ready.", stage.name),
                stage: stage.name.clone(),
                tool_ids,
            }
        })
        .collect()
}
