use super::types::{ContextualCue, ConversationPhase, CueKind};

/// Phases a conversation may move to from the given phase. Transitions are
/// forward-only; staying put is always allowed and is the default.
pub fn allowed_next(phase: ConversationPhase) -> &'static [ConversationPhase] {
    use ConversationPhase::*;
    match phase {
        Opening => &[Exploration, TaskFocus],
        Exploration => &[TaskFocus, Execution],
        TaskFocus => &[Execution, Refinement],
        Execution => &[Refinement, Wrap],
        Refinement => &[Execution, Wrap],
        Wrap => &[],
    }
}

/// Deterministic phase-transition function. A transition fires only when a
/// cue (or the elapsed-message heuristic) justifies it, and only to a member
/// of the current phase's allowed-next set.
pub fn next_phase(
    current: ConversationPhase,
    cues: &[ContextualCue],
    messages_in_phase: usize,
) -> ConversationPhase {
    let candidates = allowed_next(current);
    if candidates.is_empty() {
        return current;
    }

    let workflow_signal = strongest(cues, CueKind::Workflow);
    let tool_signal = strongest(cues, CueKind::ToolReference);
    let temporal_signal = strongest(cues, CueKind::Temporal);

    use ConversationPhase::*;
    let proposed = match current {
        Opening => {
            if tool_signal >= 0.6 {
                Some(TaskFocus)
            } else if workflow_signal >= 0.4 || messages_in_phase >= 2 {
                Some(Exploration)
            } else {
                None
            }
        }
        Exploration => {
            if tool_signal >= 0.7 && workflow_signal >= 0.5 {
                Some(Execution)
            } else if workflow_signal >= 0.4 || tool_signal >= 0.4 || messages_in_phase >= 4 {
                Some(TaskFocus)
            } else {
                None
            }
        }
        TaskFocus => {
            if tool_signal >= 0.5 || workflow_signal >= 0.5 {
                Some(Execution)
            } else if temporal_signal >= 0.6 && messages_in_phase >= 3 {
                Some(Refinement)
            } else {
                None
            }
        }
        Execution => {
            if workflow_signal >= 0.6 && temporal_signal >= 0.5 {
                Some(Wrap)
            } else if messages_in_phase >= 5 {
                Some(Refinement)
            } else {
                None
            }
        }
        Refinement => {
            if tool_signal >= 0.5 {
                Some(Execution)
            } else if temporal_signal >= 0.6 || messages_in_phase >= 4 {
                Some(Wrap)
            } else {
                None
            }
        }
        Wrap => None,
    };

    match proposed {
        Some(p) if candidates.contains(&p) => p,
        _ => current,
    }
}

fn strongest(cues: &[ContextualCue], kind: CueKind) -> f64 {
    cues.iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.relevance)
        .fold(0.0, f64::max)
}
