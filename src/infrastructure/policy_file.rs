use crate::domain::abac_policy::{PolicyLoadError, PolicyRule};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, instrument};

/// Accepted layouts of a policy file: a bare rule array, or `{"rules": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyDocument {
    Rules(Vec<PolicyRule>),
    Wrapped { rules: Vec<PolicyRule> },
}

pub fn parse_policy_document(text: &str) -> Result<Vec<PolicyRule>, PolicyLoadError> {
    let document: PolicyDocument =
        serde_json::from_str(text).map_err(|e| PolicyLoadError::Parse(e.to_string()))?;
    Ok(match document {
        PolicyDocument::Rules(rules) | PolicyDocument::Wrapped { rules } => rules,
    })
}

#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub async fn read_policy_file(path: impl AsRef<Path>) -> Result<Vec<PolicyRule>, PolicyLoadError> {
    let text = tokio::fs::read_to_string(path.as_ref())
        .await
        .map_err(|e| PolicyLoadError::Io(e.to_string()))?;
    let rules = parse_policy_document(&text)?;
    info!(rule_count = rules.len(), "Policy file read");
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_layouts() {
        let bare = r#"[{"id": "a", "effect": "Permit", "operation": "lire"}]"#;
        let wrapped = r#"{"rules": [{"id": "a", "effect": "Deny", "operation": "lire"}]}"#;
        assert_eq!(parse_policy_document(bare).unwrap().len(), 1);
        assert_eq!(parse_policy_document(wrapped).unwrap()[0].id, "a");
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_policy_document(r#"{"id": 3}"#),
            Err(PolicyLoadError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = read_policy_file("/nonexistent/policies.json").await;
        assert!(matches!(result, Err(PolicyLoadError::Io(_))));
    }
}
