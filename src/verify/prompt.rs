//! Prompt construction for mapping judgments

use crate::candidate::MappingCandidate;
use crate::graph::{Control, RelationKind};
use std::fmt::Write;

const SYSTEM_PROMPT: &str = "You are an expert in cybersecurity compliance frameworks. \
You compare controls from different standards and classify how they relate. \
You answer with a single JSON object and nothing else.";

/// A request to the verification service
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPrompt {
    pub system: String,
    pub user: String,
    /// Re-ask after a reply that failed schema validation
    pub strict: bool,
}

/// Build the judgment prompt for a candidate pair
pub fn build_prompt(candidate: &MappingCandidate, strict: bool) -> VerificationPrompt {
    let mut user = String::new();

    user.push_str("Determine the relation between the SOURCE control and the TARGET control.\n\n");
    describe_control(&mut user, "SOURCE", &candidate.source);
    describe_control(&mut user, "TARGET", &candidate.target);

    user.push_str("Relation kinds:\n");
    for kind in RelationKind::ALL {
        let _ = writeln!(user, "- {}: {}", kind, relation_hint(kind));
    }

    user.push_str(
        "\nRespond with a JSON object with exactly these fields:\n\
         {\"relation\": one of \"equivalent\", \"broader\", \"narrower\", \"related\", \"unrelated\", \
         \"confidence\": a number between 0 and 1, \
         \"rationale\": one or two sentences explaining the decision}\n",
    );

    if strict {
        user.push_str(
            "\nYour previous answer could not be parsed. Return ONLY the JSON object: \
             no markdown, no code fences, no text before or after it. \
             \"confidence\" must be a JSON number, not a string.\n",
        );
    }

    VerificationPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        strict,
    }
}

fn describe_control(out: &mut String, role: &str, control: &Control) {
    let _ = writeln!(out, "{} control {} (standard {}):", role, control.id, control.standard);
    if let Some(title) = &control.title {
        let _ = writeln!(out, "Title: {}", title);
    }
    let _ = writeln!(out, "Description: {}", control.description);
    for (key, value) in control.metadata.entries() {
        let _ = writeln!(out, "{}: {}", key, value);
    }
    out.push('\n');
}

fn relation_hint(kind: RelationKind) -> &'static str {
    match kind {
        RelationKind::Equivalent => "both controls require the same thing with the same scope",
        RelationKind::Broader => "the source control covers the target control and more",
        RelationKind::Narrower => "the source control covers only part of the target control",
        RelationKind::Related => "the controls overlap but neither contains the other",
        RelationKind::Unrelated => "the controls address different topics",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn candidate() -> MappingCandidate {
        let source = Control::new("AC-2", "NIST", "Account Management")
            .with_title("Account Management")
            .with_category("Access Control");
        let target = Control::new("PR.AC-1", "CSF", "Identities and credentials are managed")
            .with_criticality("high");
        MappingCandidate::new(Arc::new(source), Arc::new(target), 0.82)
    }

    #[test]
    fn test_prompt_contains_both_controls_and_metadata() {
        let prompt = build_prompt(&candidate(), false);
        assert!(prompt.user.contains("SOURCE control AC-2 (standard NIST)"));
        assert!(prompt.user.contains("Description: Identities and credentials are managed"));
        assert!(prompt.user.contains("category: Access Control"));
        assert!(prompt.user.contains("criticality: high"));
        assert!(prompt.user.contains("\"relation\""));
        assert!(!prompt.strict);
        assert!(!prompt.user.contains("could not be parsed"));
    }

    #[test]
    fn test_strict_prompt() {
        let prompt = build_prompt(&candidate(), true);
        assert!(prompt.strict);
        assert!(prompt.user.contains("Return ONLY the JSON object"));
    }

    #[test]
    fn test_prompt_is_stable() {
        assert_eq!(build_prompt(&candidate(), false), build_prompt(&candidate(), false));
    }
}
