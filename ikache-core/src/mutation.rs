//! Canonical write descriptions
//!
//! A [`Mutation`] is an ordered sequence of [`Change`]s. The coordinator
//! hands mutations to the dependency engine before the database write runs,
//! so the engine matches dependencies against its pre-write view.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::FilterNode;

/// An ordered sequence of changes applied by a single write operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub changes: Vec<Change>,
}

impl Mutation {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    /// Mutation consisting of a single change.
    pub fn single(change: Change) -> Self {
        Self {
            changes: vec![change],
        }
    }
}

/// One change within a mutation.
///
/// Targets a model, optionally identified by id(s) or a filter. Insert and
/// update carry field sets; link and unlink carry a relation plus the
/// target model and target id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Change {
    #[serde(rename_all = "camelCase")]
    Insert {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sets: Option<Map<String, Value>>,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ids: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<FilterNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sets: Option<Map<String, Value>>,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ids: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<FilterNode>,
    },
    #[serde(rename_all = "camelCase")]
    Link {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        relation: String,
        target_model: String,
        target_id: Value,
    },
    #[serde(rename_all = "camelCase")]
    Unlink {
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        relation: String,
        target_model: String,
        target_id: Value,
    },
}

impl Change {
    pub fn insert(model: impl Into<String>, sets: Map<String, Value>) -> Self {
        Self::Insert {
            model: model.into(),
            sets: Some(sets),
        }
    }

    /// Update the records matching a filter.
    pub fn update_where(
        model: impl Into<String>,
        filter: FilterNode,
        sets: Map<String, Value>,
    ) -> Self {
        Self::Update {
            model: model.into(),
            ids: None,
            filter: Some(filter),
            sets: Some(sets),
        }
    }

    /// Update specific records by id.
    pub fn update_by_ids(
        model: impl Into<String>,
        ids: Vec<Value>,
        sets: Map<String, Value>,
    ) -> Self {
        Self::Update {
            model: model.into(),
            ids: Some(ids),
            filter: None,
            sets: Some(sets),
        }
    }

    pub fn delete_by_ids(model: impl Into<String>, ids: Vec<Value>) -> Self {
        Self::Delete {
            model: model.into(),
            ids: Some(ids),
            filter: None,
        }
    }

    pub fn delete_where(model: impl Into<String>, filter: FilterNode) -> Self {
        Self::Delete {
            model: model.into(),
            ids: None,
            filter: Some(filter),
        }
    }

    /// The model this change targets.
    pub fn model(&self) -> &str {
        match self {
            Self::Insert { model, .. }
            | Self::Update { model, .. }
            | Self::Delete { model, .. }
            | Self::Link { model, .. }
            | Self::Unlink { model, .. } => model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sets(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_change_wire_form_carries_action_tag() {
        let change = Change::insert("User", sets(&[("name", json!("Bob"))]));
        let wire = serde_json::to_value(&change).unwrap();
        assert_eq!(wire["action"], "insert");
        assert_eq!(wire["model"], "User");
        assert_eq!(wire["sets"]["name"], "Bob");
    }

    #[test]
    fn test_link_uses_camel_case_fields() {
        let change = Change::Link {
            model: "Post".to_string(),
            id: Some(json!("p1")),
            relation: "tags".to_string(),
            target_model: "Tag".to_string(),
            target_id: json!("t1"),
        };
        let wire = serde_json::to_value(&change).unwrap();
        assert_eq!(wire["action"], "link");
        assert_eq!(wire["targetModel"], "Tag");
        assert_eq!(wire["targetId"], "t1");
    }

    #[test]
    fn test_mutation_preserves_change_order() {
        let mutation = Mutation::new(vec![
            Change::delete_by_ids("User", vec![json!("u1")]),
            Change::insert("User", sets(&[("name", json!("Eve"))])),
        ]);
        let wire = serde_json::to_value(&mutation).unwrap();
        assert_eq!(wire["changes"][0]["action"], "delete");
        assert_eq!(wire["changes"][1]["action"], "insert");
    }
}
