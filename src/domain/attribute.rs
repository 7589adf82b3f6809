use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Name under which an entity's class is visible to rule conditions.
pub const CLASS_ATTRIBUTE: &str = "class";
/// Field of an entity payload that carries its identifier rather than an attribute.
pub const ID_FIELD: &str = "id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Subject,
    Resource,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Subject => "subject",
            EntityKind::Resource => "resource",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributeError {
    #[error("entity payload must be a JSON object")]
    NotAnObject,
    #[error("entity is missing a string `class` field")]
    MissingClass,
    #[error("attribute `{0}` must be a string, number or boolean")]
    NonScalar(String),
    #[error("entity `id` must be a non-empty string")]
    InvalidId,
}

/// Read access to attributes by name, shared by stored and inline entities.
pub trait AttributeLookup {
    fn lookup(&self, name: &str) -> Option<&str>;
}

/// Attribute name to canonical value. Strings are kept verbatim, numbers and
/// booleans in their JSON text form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(BTreeMap<String, String>);

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical string form of a scalar JSON value.
    pub fn canonical_value(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl AttributeLookup for AttributeSet {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub class: String,
    pub attributes: AttributeSet,
}

impl Entity {
    pub fn new(id: impl Into<String>, class: impl Into<String>, attributes: AttributeSet) -> Self {
        let mut attributes = attributes;
        // The class lives in its own field; a stray copy in the set would shadow it.
        attributes.0.remove(CLASS_ATTRIBUTE);
        Self {
            id: id.into(),
            class: class.into(),
            attributes,
        }
    }

    /// Builds an entity from a JSON attribute object such as
    /// `{"class": "Person", "role": "professeur"}`.
    ///
    /// `id` wins over an `id` field in the payload. `default_class` applies when
    /// the payload carries no `class`.
    pub fn from_json_object(
        id: Option<&str>,
        object: &Map<String, Value>,
        default_class: Option<&str>,
    ) -> Result<Self, AttributeError> {
        let class = match object.get(CLASS_ATTRIBUTE) {
            Some(Value::String(class)) if !class.is_empty() => class.clone(),
            Some(_) => return Err(AttributeError::MissingClass),
            None => default_class
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .ok_or(AttributeError::MissingClass)?,
        };

        let id = match (id, object.get(ID_FIELD)) {
            (Some(id), _) => id.to_string(),
            (None, Some(Value::String(id))) => id.clone(),
            (None, Some(_)) => return Err(AttributeError::InvalidId),
            (None, None) => String::new(),
        };

        let mut attributes = AttributeSet::new();
        for (name, value) in object {
            if name == CLASS_ATTRIBUTE || name == ID_FIELD {
                continue;
            }
            let value = AttributeSet::canonical_value(value)
                .ok_or_else(|| AttributeError::NonScalar(name.clone()))?;
            attributes.insert(name.clone(), value);
        }

        Ok(Self {
            id,
            class,
            attributes,
        })
    }

    /// Every (name, value) pair visible to conditions, class included.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        std::iter::once((CLASS_ATTRIBUTE, self.class.as_str())).chain(self.attributes.iter())
    }
}

impl AttributeLookup for Entity {
    fn lookup(&self, name: &str) -> Option<&str> {
        if name == CLASS_ATTRIBUTE {
            Some(self.class.as_str())
        } else {
            self.attributes.get(name)
        }
    }
}

/// How a request names an entity: attributes given inline, or the id of an
/// entity already held by the attribute store.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityRef {
    Inline(Entity),
    Stored(String),
}

impl EntityRef {
    /// `{"id": "user1011"}` is a stored reference; any other object is inline
    /// and must carry a `class`.
    pub fn from_json(value: &Value) -> Result<Self, AttributeError> {
        let object = value.as_object().ok_or(AttributeError::NotAnObject)?;
        if object.len() == 1 {
            if let Some(id) = object.get(ID_FIELD) {
                return match id {
                    Value::String(id) if !id.is_empty() => Ok(EntityRef::Stored(id.clone())),
                    _ => Err(AttributeError::InvalidId),
                };
            }
        }
        Entity::from_json_object(None, object, None).map(EntityRef::Inline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_from_json_object() {
        let payload = json!({"class": "Person", "role": "professeur", "age": 41, "active": true});
        let entity =
            Entity::from_json_object(Some("u1"), payload.as_object().unwrap(), None).unwrap();
        assert_eq!(entity.id, "u1");
        assert_eq!(entity.class, "Person");
        assert_eq!(entity.lookup("role"), Some("professeur"));
        assert_eq!(entity.lookup("age"), Some("41"));
        assert_eq!(entity.lookup("active"), Some("true"));
        assert_eq!(entity.lookup("class"), Some("Person"));
        assert_eq!(entity.attributes.len(), 3);
    }

    #[test]
    fn test_entity_default_class_and_payload_id() {
        let payload = json!({"id": "f-1", "montant": 120.5});
        let entity =
            Entity::from_json_object(None, payload.as_object().unwrap(), Some("Facture")).unwrap();
        assert_eq!(entity.id, "f-1");
        assert_eq!(entity.class, "Facture");
        assert_eq!(entity.lookup("montant"), Some("120.5"));
        assert_eq!(entity.lookup("id"), None);
    }

    #[test]
    fn test_entity_rejects_missing_class_and_nested_values() {
        let payload = json!({"role": "professeur"});
        assert_eq!(
            Entity::from_json_object(None, payload.as_object().unwrap(), None),
            Err(AttributeError::MissingClass)
        );

        let payload = json!({"class": "Person", "tags": ["a"]});
        assert_eq!(
            Entity::from_json_object(None, payload.as_object().unwrap(), None),
            Err(AttributeError::NonScalar("tags".to_string()))
        );
    }

    #[test]
    fn test_entity_ref_from_json() {
        assert_eq!(
            EntityRef::from_json(&json!({"id": "user1011"})).unwrap(),
            EntityRef::Stored("user1011".to_string())
        );
        match EntityRef::from_json(&json!({"class": "Diplome"})).unwrap() {
            EntityRef::Inline(entity) => assert_eq!(entity.class, "Diplome"),
            other => panic!("expected inline entity, got {other:?}"),
        }
        assert_eq!(
            EntityRef::from_json(&json!("Diplome")),
            Err(AttributeError::NotAnObject)
        );
        assert_eq!(
            EntityRef::from_json(&json!({"id": ""})),
            Err(AttributeError::InvalidId)
        );
    }

    #[test]
    fn test_entity_new_drops_shadowing_class_attribute() {
        let attrs = AttributeSet::new().with("class", "Other").with("role", "x");
        let entity = Entity::new("e", "Person", attrs);
        assert_eq!(entity.lookup("class"), Some("Person"));
        assert_eq!(entity.pairs().count(), 2);
    }
}
