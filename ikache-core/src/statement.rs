//! Canonical read descriptions
//!
//! A [`Statement`] is the engine-recognised description of a read: the
//! target model plus optional projection, filter tree, sort, pagination,
//! nested inclusions, distinct and grouping clauses. Statements are value
//! objects; two equal statements map to equal [`ShapeId`]s.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque deterministic identifier for a [`Statement`].
///
/// Produced by the dependency engine from the statement's normalized
/// content and used as the sole cache key. Never parsed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(String);

impl ShapeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ShapeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ShapeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Canonical description of a read query.
///
/// Serialized camelCase because this is the engine's wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    /// Target model name.
    pub model: String,
    /// Ordered set of selected fields. None means "all fields".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    /// Filter tree applied to the model's records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterNode>,
    /// Ordered sort list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    /// Nested inclusions; each may carry a full nested statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub includes: Option<Vec<Include>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
}

impl Statement {
    /// Create a bare statement selecting all records of a model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            projection: None,
            filter: None,
            sort: None,
            pagination: None,
            includes: None,
            distinct: None,
            grouping: None,
        }
    }

    pub fn with_projection(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }

    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn with_include(mut self, include: Include) -> Self {
        self.includes.get_or_insert_with(Vec::new).push(include);
        self
    }

    pub fn with_distinct(mut self, fields: Vec<String>) -> Self {
        self.distinct = Some(fields);
        self
    }

    pub fn with_grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = Some(grouping);
        self
    }
}

/// Filter tree: AND/OR/NOT internal nodes with leaf conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterNode {
    And { children: Vec<FilterNode> },
    Or { children: Vec<FilterNode> },
    Not { child: Box<FilterNode> },
    Condition(Condition),
}

impl FilterNode {
    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::And { children }
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::Or { children }
    }

    pub fn not(child: FilterNode) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

    pub fn condition(
        field: impl Into<String>,
        operator: FilterOperator,
        value: Value,
    ) -> Self {
        Self::Condition(Condition {
            field: field.into(),
            path: None,
            operator,
            value,
        })
    }

    /// Equality condition shorthand.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::condition(field, FilterOperator::Eq, value)
    }
}

/// Leaf comparison in a filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    /// Relation path for conditions on nested records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    pub operator: FilterOperator,
    pub value: Value,
}

/// Comparison operator for leaf conditions.
///
/// The set is open: operators the mapper cannot represent precisely travel
/// in the `unsupported:*` namespace, and operators it does not recognise at
/// all in the `unknown:*` namespace. The engine applies conservative
/// invalidation to both; queries are never rejected locally over them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    /// Recognised but not precisely representable; engine over-evicts.
    Unsupported(String),
    /// Not recognised at all; engine over-evicts.
    Unknown(String),
}

impl FilterOperator {
    /// Canonical wire token for this operator.
    pub fn token(&self) -> String {
        match self {
            Self::Eq => "eq".to_string(),
            Self::Ne => "ne".to_string(),
            Self::Gt => "gt".to_string(),
            Self::Gte => "gte".to_string(),
            Self::Lt => "lt".to_string(),
            Self::Lte => "lte".to_string(),
            Self::In => "in".to_string(),
            Self::NotIn => "notIn".to_string(),
            Self::Contains => "contains".to_string(),
            Self::StartsWith => "startsWith".to_string(),
            Self::EndsWith => "endsWith".to_string(),
            Self::Unsupported(op) => format!("unsupported:{op}"),
            Self::Unknown(op) => format!("unknown:{op}"),
        }
    }
}

impl From<String> for FilterOperator {
    fn from(token: String) -> Self {
        match token.as_str() {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "in" => Self::In,
            "notIn" => Self::NotIn,
            "contains" => Self::Contains,
            "startsWith" => Self::StartsWith,
            "endsWith" => Self::EndsWith,
            _ => match token.split_once(':') {
                Some(("unsupported", op)) => Self::Unsupported(op.to_string()),
                Some(("unknown", op)) => Self::Unknown(op.to_string()),
                _ => Self::Unknown(token),
            },
        }
    }
}

impl From<FilterOperator> for String {
    fn from(operator: FilterOperator) -> Self {
        operator.token()
    }
}

/// One entry of an ordered sort list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Window over the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl Pagination {
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self { limit, offset }
    }

    pub fn limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }
}

/// Nested inclusion of a related model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Include {
    /// Relation name on the parent model.
    pub relation: String,
    /// Nested statement restricting the included records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<Statement>,
}

impl Include {
    pub fn relation(name: impl Into<String>) -> Self {
        Self {
            relation: name.into(),
            statement: None,
        }
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statement = Some(statement);
        self
    }
}

/// Grouping clause with an optional having-filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grouping {
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<FilterNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_statements_compare_equal() {
        let build = || {
            Statement::new("User")
                .with_filter(FilterNode::eq("email", json!("a@b.c")))
                .with_sort(vec![SortSpec::desc("createdAt")])
                .with_pagination(Pagination::limit(10))
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_statement_wire_form_is_camel_case() {
        let stmt = Statement::new("Post").with_include(
            Include::relation("author").with_statement(
                Statement::new("User").with_projection(vec!["id".to_string()]),
            ),
        );
        let wire = serde_json::to_value(&stmt).unwrap();
        assert_eq!(wire["model"], "Post");
        assert_eq!(wire["includes"][0]["relation"], "author");
        assert_eq!(wire["includes"][0]["statement"]["projection"][0], "id");
        // Unset clauses are omitted entirely.
        assert!(wire.get("filter").is_none());
    }

    #[test]
    fn test_operator_tokens_round_trip() {
        for op in [
            FilterOperator::Eq,
            FilterOperator::NotIn,
            FilterOperator::StartsWith,
            FilterOperator::Unsupported("fullTextSearch".to_string()),
            FilterOperator::Unknown("search".to_string()),
        ] {
            let token = op.token();
            assert_eq!(FilterOperator::from(token), op);
        }
    }

    #[test]
    fn test_unrecognised_operator_lands_in_unknown_namespace() {
        let op = FilterOperator::from("geoWithin".to_string());
        assert_eq!(op, FilterOperator::Unknown("geoWithin".to_string()));
        assert_eq!(op.token(), "unknown:geoWithin");
    }

    mod operator_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Canonical tokens are a fixed point of parse-then-print.
            #[test]
            fn canonical_token_is_stable(token in "[a-zA-Z:]{1,24}") {
                let canonical = FilterOperator::from(token).token();
                prop_assert_eq!(FilterOperator::from(canonical.clone()).token(), canonical);
            }
        }
    }

    #[test]
    fn test_filter_tree_serde_round_trip() {
        let filter = FilterNode::and(vec![
            FilterNode::eq("status", json!("active")),
            FilterNode::not(FilterNode::condition(
                "age",
                FilterOperator::Lt,
                json!(18),
            )),
        ]);
        let wire = serde_json::to_string(&filter).unwrap();
        let back: FilterNode = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, filter);
    }
}
