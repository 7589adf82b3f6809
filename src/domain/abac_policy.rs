use crate::domain::attribute::AttributeLookup;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Effect {
    Permit,
    Deny,
}

/// One attribute test. A rule side is the conjunction of its conditions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { attribute: String, value: String },
    NotEquals { attribute: String, value: String },
    In { attribute: String, values: Vec<String> },
    Present { attribute: String },
    GreaterThan { attribute: String, value: f64 },
    LessThan { attribute: String, value: f64 },
    Any,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("condition references attribute `{attribute}` which the entity does not carry")]
    InvalidAttributeReference { attribute: String },
    #[error("attribute `{attribute}` value `{value}` is not numeric")]
    NonNumericAttribute { attribute: String, value: String },
}

impl Condition {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn one_of<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition::In {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn attribute(&self) -> Option<&str> {
        match self {
            Condition::Equals { attribute, .. }
            | Condition::NotEquals { attribute, .. }
            | Condition::In { attribute, .. }
            | Condition::Present { attribute }
            | Condition::GreaterThan { attribute, .. }
            | Condition::LessThan { attribute, .. } => Some(attribute),
            Condition::Any => None,
        }
    }

    /// Values an entity must carry for this condition to hold, when the
    /// condition pins the attribute to a finite set.
    pub fn pinned_values(&self) -> Option<(&str, Vec<&str>)> {
        match self {
            Condition::Equals { attribute, value } => Some((attribute, vec![value.as_str()])),
            Condition::In { attribute, values } => {
                Some((attribute, values.iter().map(String::as_str).collect()))
            }
            _ => None,
        }
    }

    pub fn test(&self, attrs: &dyn AttributeLookup) -> Result<bool, EvaluationError> {
        let attribute = match self {
            Condition::Any => return Ok(true),
            Condition::Present { attribute } => return Ok(attrs.lookup(attribute).is_some()),
            other => other.attribute().unwrap_or_default(),
        };
        let actual =
            attrs
                .lookup(attribute)
                .ok_or_else(|| EvaluationError::InvalidAttributeReference {
                    attribute: attribute.to_string(),
                })?;

        Ok(match self {
            Condition::Equals { value, .. } => actual == value,
            Condition::NotEquals { value, .. } => actual != value,
            Condition::In { values, .. } => values.iter().any(|v| v == actual),
            Condition::GreaterThan { value, .. } => numeric(attribute, actual)? > *value,
            Condition::LessThan { value, .. } => numeric(attribute, actual)? < *value,
            Condition::Present { .. } | Condition::Any => true,
        })
    }
}

fn numeric(attribute: &str, actual: &str) -> Result<f64, EvaluationError> {
    actual
        .parse::<f64>()
        .map_err(|_| EvaluationError::NonNumericAttribute {
            attribute: attribute.to_string(),
            value: actual.to_string(),
        })
}

/// Conjunction of conditions. The empty predicate holds for every entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Predicate(pub Vec<Condition>);

impl Predicate {
    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    pub fn matches(&self, attrs: &dyn AttributeLookup) -> Result<bool, EvaluationError> {
        for condition in &self.0 {
            if !condition.test(attrs)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PolicyRule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub effect: Effect,
    pub operation: String,
    #[serde(default)]
    pub subject: Predicate,
    #[serde(default)]
    pub resource: Predicate,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("rule at position {0} has an empty id")]
    EmptyRuleId(usize),
    #[error("rule id `{0}` appears more than once")]
    DuplicateRuleId(String),
    #[error("rule `{0}` has an empty operation")]
    EmptyOperation(String),
    #[error("rule `{0}` has a condition with an empty attribute name")]
    EmptyAttribute(String),
    #[error("rule `{rule_id}` tests membership of `{attribute}` in an empty set")]
    EmptyMembershipSet { rule_id: String, attribute: String },
    #[error("rule `{rule_id}` compares `{attribute}` against a non-finite bound")]
    NonFiniteBound { rule_id: String, attribute: String },
    #[error("policy document could not be parsed: {0}")]
    Parse(String),
    #[error("policy document could not be read: {0}")]
    Io(String),
}

impl PolicyRule {
    pub fn new(id: impl Into<String>, effect: Effect, operation: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            effect,
            operation: operation.into(),
            subject: Predicate::default(),
            resource: Predicate::default(),
        }
    }

    pub fn permit(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(id, Effect::Permit, operation)
    }

    pub fn deny(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(id, Effect::Deny, operation)
    }

    pub fn with_subject(mut self, condition: Condition) -> Self {
        self.subject.0.push(condition);
        self
    }

    pub fn with_resource(mut self, condition: Condition) -> Self {
        self.resource.0.push(condition);
        self
    }

    pub fn validate(&self) -> Result<(), PolicyLoadError> {
        if self.operation.trim().is_empty() {
            return Err(PolicyLoadError::EmptyOperation(self.id.clone()));
        }
        for condition in self.subject.0.iter().chain(&self.resource.0) {
            if condition.attribute().is_some_and(|a| a.trim().is_empty()) {
                return Err(PolicyLoadError::EmptyAttribute(self.id.clone()));
            }
            match condition {
                Condition::In { attribute, values } if values.is_empty() => {
                    return Err(PolicyLoadError::EmptyMembershipSet {
                        rule_id: self.id.clone(),
                        attribute: attribute.clone(),
                    });
                }
                Condition::GreaterThan { attribute, value }
                | Condition::LessThan { attribute, value }
                    if !value.is_finite() =>
                {
                    return Err(PolicyLoadError::NonFiniteBound {
                        rule_id: self.id.clone(),
                        attribute: attribute.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Validates a whole rule set: each rule on its own, plus id uniqueness.
pub fn validate_rules(rules: &[PolicyRule]) -> Result<(), PolicyLoadError> {
    let mut seen = HashSet::new();
    for (position, rule) in rules.iter().enumerate() {
        if rule.id.trim().is_empty() {
            return Err(PolicyLoadError::EmptyRuleId(position));
        }
        if !seen.insert(rule.id.as_str()) {
            return Err(PolicyLoadError::DuplicateRuleId(rule.id.clone()));
        }
        rule.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attribute::{AttributeSet, Entity};

    fn professeur() -> Entity {
        Entity::new(
            "p1",
            "Person",
            AttributeSet::new().with("role", "professeur").with("age", "52"),
        )
    }

    #[test]
    fn test_condition_variants() {
        let subject = professeur();
        assert!(Condition::equals("role", "professeur").test(&subject).unwrap());
        assert!(!Condition::equals("role", "etudiant").test(&subject).unwrap());
        assert!(
            Condition::one_of("role", ["etudiant", "professeur"])
                .test(&subject)
                .unwrap()
        );
        assert!(
            Condition::NotEquals {
                attribute: "class".into(),
                value: "Diplome".into()
            }
            .test(&subject)
            .unwrap()
        );
        assert!(
            Condition::GreaterThan {
                attribute: "age".into(),
                value: 50.0
            }
            .test(&subject)
            .unwrap()
        );
        assert!(Condition::Any.test(&subject).unwrap());
        assert!(
            !Condition::Present {
                attribute: "region".into()
            }
            .test(&subject)
            .unwrap()
        );
    }

    #[test]
    fn test_missing_attribute_is_reported() {
        let err = Condition::equals("region", "emea")
            .test(&professeur())
            .unwrap_err();
        assert_eq!(
            err,
            EvaluationError::InvalidAttributeReference {
                attribute: "region".to_string()
            }
        );
    }

    #[test]
    fn test_numeric_condition_on_text_value() {
        let err = Condition::LessThan {
            attribute: "role".into(),
            value: 3.0,
        }
        .test(&professeur())
        .unwrap_err();
        assert!(matches!(err, EvaluationError::NonNumericAttribute { .. }));
    }

    #[test]
    fn test_rule_deserialization() {
        let rule: PolicyRule = serde_json::from_str(
            r#"{
                "id": "prof-lire-diplome",
                "effect": "Permit",
                "operation": "lire",
                "subject": [{"op": "equals", "attribute": "role", "value": "professeur"}],
                "resource": [{"op": "in", "attribute": "class", "values": ["Diplome"]}, {"op": "any"}]
            }"#,
        )
        .unwrap();
        assert_eq!(rule.effect, Effect::Permit);
        assert_eq!(rule.subject.conditions().len(), 1);
        assert_eq!(rule.resource.conditions()[1], Condition::Any);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_validate_rules() {
        let ok = vec![PolicyRule::permit("a", "lire"), PolicyRule::deny("b", "lire")];
        assert!(validate_rules(&ok).is_ok());

        let duplicate = vec![PolicyRule::permit("a", "lire"), PolicyRule::deny("a", "ecrire")];
        assert_eq!(
            validate_rules(&duplicate),
            Err(PolicyLoadError::DuplicateRuleId("a".to_string()))
        );

        let empty_set = vec![
            PolicyRule::permit("a", "lire").with_subject(Condition::In {
                attribute: "role".into(),
                values: vec![],
            }),
        ];
        assert!(matches!(
            validate_rules(&empty_set),
            Err(PolicyLoadError::EmptyMembershipSet { .. })
        ));

        assert_eq!(
            validate_rules(&[PolicyRule::permit("a", " ")]),
            Err(PolicyLoadError::EmptyOperation("a".to_string()))
        );
        assert_eq!(
            validate_rules(&[PolicyRule::permit("", "lire")]),
            Err(PolicyLoadError::EmptyRuleId(0))
        );
    }
}
