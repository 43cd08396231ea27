use std::sync::LazyLock;

use regex::Regex;

use super::types::{ContextualCue, CueKind};

struct CuePattern {
    kind: CueKind,
    regex: Regex,
    relevance: f64,
    signal: &'static str,
}

fn pat(kind: CueKind, re: &str, relevance: f64, signal: &'static str) -> CuePattern {
    CuePattern {
        kind,
        regex: Regex::new(re).expect("static cue pattern"),
        relevance,
        signal,
    }
}

static PATTERNS: LazyLock<Vec<CuePattern>> = LazyLock::new(|| {
    vec![
        // temporal
        pat(CueKind::Temporal, r"(?i)\b(now|asap|urgent|immediately|right away)\b", 0.9, "urgency"),
        pat(CueKind::Temporal, r"(?i)\b(today|tonight|by (end of day|eod))\b", 0.7, "same-day deadline"),
        pat(CueKind::Temporal, r"(?i)\b(deadline|due|schedule|by (monday|tuesday|wednesday|thursday|friday))\b", 0.6, "deadline"),
        pat(CueKind::Temporal, r"(?i)\b(later|eventually|sometime|no rush)\b", 0.3, "deferred timing"),
        // workflow
        pat(CueKind::Workflow, r"(?i)\b(next step|then|after that|followed by|pipeline)\b", 0.7, "sequencing"),
        pat(CueKind::Workflow, r"(?i)\b(first|second|third|finally|step \d+)\b", 0.6, "ordered steps"),
        pat(CueKind::Workflow, r"(?i)\b(workflow|process|procedure|stage)\b", 0.6, "process framing"),
        pat(CueKind::Workflow, r"(?i)\b(finish(ed)?|complete[d]?|done with)\b", 0.5, "completion"),
        // tool references
        pat(CueKind::ToolReference, r"(?i)\b(tool|plugin|integration|automation)\b", 0.7, "tooling"),
        pat(CueKind::ToolReference, r"(?i)\b(run|execute|launch|invoke|trigger)\b", 0.6, "execution verb"),
        pat(CueKind::ToolReference, r"(?i)\b(export|import|convert|generate|analy[sz]e)\b", 0.6, "operation verb"),
        pat(CueKind::ToolReference, r"(?i)\b(csv|spreadsheet|report|dashboard|api|database)\b", 0.5, "artifact"),
        // user state
        pat(CueKind::UserState, r"(?i)\b(stuck|confused|lost|don'?t (know|understand))\b", 0.8, "needs help"),
        pat(CueKind::UserState, r"(?i)\b(frustrat(ed|ing)|annoying|broken|not working)\b", 0.7, "frustration"),
        pat(CueKind::UserState, r"(?i)\b(how (do|can|should) i|what('s| is) the best way)\b", 0.7, "guidance request"),
        pat(CueKind::UserState, r"(?i)\b(thanks|great|perfect|awesome)\b", 0.3, "positive state"),
        // environment
        pat(CueKind::Environment, r"(?i)\b(team|colleague|shared|workspace)\b", 0.5, "collaborative setting"),
        pat(CueKind::Environment, r"(?i)\b(production|staging|environment|deploy(ment)?)\b", 0.6, "deployment context"),
        pat(CueKind::Environment, r"(?i)\b(file|folder|document|project)\b", 0.4, "artifact context"),
    ]
});

/// Extract cues from a message across the five fixed families, keeping only
/// those at or above the relevance threshold.
pub fn extract_cues(content: &str, threshold: f64) -> Vec<ContextualCue> {
    let mut cues: Vec<ContextualCue> = Vec::new();
    for p in PATTERNS.iter() {
        if p.relevance < threshold {
            continue;
        }
        if let Some(m) = p.regex.find(content) {
            cues.push(ContextualCue {
                kind: p.kind,
                signal: format!("{}: {}", p.signal, m.as_str().to_lowercase()),
                relevance: p.relevance,
            });
        }
    }
    // strongest first, one pass so duplicates within a family are fine
    cues.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
    cues
}

/// Fraction of cue families present, used as a density signal for timing.
pub fn family_density(cues: &[ContextualCue]) -> f64 {
    let mut seen = [false; 5];
    for c in cues {
        let idx = match c.kind {
            CueKind::Temporal => 0,
            CueKind::Workflow => 1,
            CueKind::ToolReference => 2,
            CueKind::UserState => 3,
            CueKind::Environment => 4,
        };
        seen[idx] = true;
    }
    seen.iter().filter(|s| **s).count() as f64 / 5.0
}
