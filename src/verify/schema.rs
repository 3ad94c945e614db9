//! Strict parsing of verification replies
//!
//! Accepted shape: a JSON object with `relation` (one of the five relation
//! kinds), `confidence` (a JSON number) and `rationale` (a string). The object
//! may be wrapped in a markdown fence or surrounded by prose; anything else is
//! rejected with a reason.

use crate::graph::RelationKind;
use serde_json::Value;

/// A reply that passed schema validation
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJudgment {
    pub kind: RelationKind,
    /// Clamped into [0, 1]
    pub confidence: f64,
    pub rationale: String,
    /// The model's confidence was outside [0, 1]
    pub clamped: bool,
}

/// Parse a raw reply, returning the rejection reason on failure
pub fn parse_response(response: &str) -> Result<ParsedJudgment, String> {
    let json = extract_json(response).ok_or_else(|| "no JSON object in reply".to_string())?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {}", e))?;
    let object = value
        .as_object()
        .ok_or_else(|| "reply is not a JSON object".to_string())?;

    let relation = object
        .get("relation")
        .ok_or_else(|| "missing field 'relation'".to_string())?
        .as_str()
        .ok_or_else(|| "'relation' is not a string".to_string())?;
    let kind: RelationKind = relation.parse().map_err(|e| format!("{}", e))?;

    let raw_confidence = match object.get("confidence") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| "'confidence' is not representable".to_string())?,
        Some(_) => return Err("'confidence' is not a number".to_string()),
        None => return Err("missing field 'confidence'".to_string()),
    };

    let rationale = match object.get("rationale") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(_) => return Err("'rationale' is not a string".to_string()),
        None => return Err("missing field 'rationale'".to_string()),
    };

    let confidence = raw_confidence.clamp(0.0, 1.0);

    Ok(ParsedJudgment {
        kind,
        confidence,
        rationale,
        clamped: confidence != raw_confidence,
    })
}

/// Locate the JSON object in a reply that may contain markdown fences or prose
fn extract_json(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    // If response contains a fenced code block, look inside the first one
    let body = match trimmed.find("```") {
        Some(start) => {
            let after_fence = &trimmed[start + 3..];
            // Skip language tag (e.g. "json\n")
            let code_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
            match after_fence[code_start..].find("```") {
                Some(end) => &after_fence[code_start..code_start + end],
                None => &after_fence[code_start..],
            }
        }
        None => trimmed,
    };

    let open = body.find('{')?;
    let close = body.rfind('}')?;
    (close > open).then(|| &body[open..=close])
}
