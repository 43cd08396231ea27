use crate::catalog::{SkillLevel, ToolSpec};
use crate::context::types::{Complexity, ConversationContext};

pub struct ScoredTool {
    pub tool: ToolSpec,
    pub confidence: f64,
    pub reasoning: String,
}

/// Score one candidate against the conversation context. Components: intent
/// match, required-capability overlap, skill-level fit, and historical
/// effectiveness (neutral 0.5 when the tool has no track record).
pub fn score_tool(
    tool: &ToolSpec,
    context: &ConversationContext,
    effectiveness: Option<f64>,
) -> ScoredTool {
    let intent = &context.intent;

    let intent_score = if tool.category == intent.category {
        0.5 + 0.5 * intent.confidence
    } else {
        0.15
    };

    let capability_score = if intent.required_capabilities.is_empty() {
        0.5
    } else {
        let overlap = intent
            .required_capabilities
            .iter()
            .filter(|c| tool.capabilities.contains(c))
            .count();
        overlap as f64 / intent.required_capabilities.len() as f64
    };

    let skill_score = if tool.skill_level <= comfortable_level(intent.complexity) {
        1.0
    } else {
        0.4
    };

    let history_score = effectiveness.unwrap_or(0.5);

    let mentioned = context.history.last().is_some_and(|m| {
        m.tool_mentions
            .iter()
            .any(|mention| tool.name.to_lowercase().contains(mention) || tool.id.contains(mention))
    });
    let mention_boost = if mentioned { 0.1 } else { 0.0 };

    let confidence = (0.45 * intent_score
        + 0.2 * capability_score
        + 0.15 * skill_score
        + 0.2 * history_score
        + mention_boost)
        .clamp(0.0, 1.0);

    let mut reasons = Vec::new();
    if tool.category == intent.category {
        reasons.push(format!("matches your {:?} intent", intent.category));
    }
    if capability_score > 0.5 && !intent.required_capabilities.is_empty() {
        reasons.push("covers the capabilities this task needs".to_string());
    }
    if let Some(eff) = effectiveness {
        if eff >= 0.6 {
            reasons.push("has worked well for similar requests".to_string());
        }
    }
    if mentioned {
        reasons.push("relates to what you just mentioned".to_string());
    }
    if reasons.is_empty() {
        reasons.push(format!("may help with {}", tool.description.to_lowercase()));
    }
    let reasoning = format!("{} {}", tool.name, reasons.join(" and "));

    ScoredTool {
        tool: tool.clone(),
        confidence,
        reasoning,
    }
}

fn comfortable_level(complexity: Complexity) -> SkillLevel {
    match complexity {
        Complexity::Simple => SkillLevel::Beginner,
        Complexity::Moderate => SkillLevel::Intermediate,
        Complexity::Complex => SkillLevel::Advanced,
    }
}
