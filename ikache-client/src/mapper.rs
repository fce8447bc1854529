//! ORM mapper contract and the JSON reference mapper
//!
//! The mapper is the translation seam between a host ORM's call arguments
//! and the engine's canonical vocabulary. Translation is mechanical and
//! total: operators the mapper cannot represent precisely travel in the
//! `unsupported:*` / `unknown:*` namespaces so the engine can apply
//! conservative invalidation; no call is rejected locally over an operator.

use ikache_core::{
    AppSchema, Change, Condition, FilterNode, FilterOperator, Grouping, IkacheError, IkacheResult,
    Include, Mutation, Pagination, SortDirection, SortSpec, Statement,
};
use serde_json::{Map, Value};

/// A single call arriving from the host ORM surface.
#[derive(Debug, Clone, PartialEq)]
pub struct OrmCall {
    pub model: String,
    pub operation: String,
    pub args: Value,
}

impl OrmCall {
    pub fn new(model: impl Into<String>, operation: impl Into<String>, args: Value) -> Self {
        Self {
            model: model.into(),
            operation: operation.into(),
            args,
        }
    }
}

/// Whether a call reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// Translates ORM call arguments into the engine's canonical vocabulary.
pub trait OrmMapper: Send + Sync {
    fn operation_kind(&self, call: &OrmCall) -> OperationKind;
    fn build_statement(&self, call: &OrmCall) -> IkacheResult<Statement>;
    fn build_mutation(&self, call: &OrmCall) -> IkacheResult<Mutation>;
}

const READ_OPERATIONS: &[&str] = &[
    "findMany",
    "findUnique",
    "findFirst",
    "count",
    "aggregate",
    "groupBy",
];

const WRITE_OPERATIONS: &[&str] = &[
    "create",
    "createMany",
    "update",
    "updateMany",
    "upsert",
    "delete",
    "deleteMany",
    "connect",
    "disconnect",
];

/// Operator keys the mapper recognises but cannot represent precisely.
const IMPRECISE_OPERATORS: &[&str] = &["search", "mode", "hasSome", "hasEvery", "isSet"];

/// Reference mapper over a generic JSON call description.
///
/// Args follow the familiar ORM shape: `where`, `select`, `orderBy`,
/// `take`/`skip`, `include`, `distinct`, `by`/`having` for grouping, and
/// `data` for writes. The schema resolves include relations to their
/// target models.
pub struct JsonMapper {
    schema: AppSchema,
}

impl JsonMapper {
    pub fn new(schema: AppSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &AppSchema {
        &self.schema
    }

    fn statement_for(&self, model: &str, operation: &str, args: &Value) -> Statement {
        let mut statement = Statement::new(model);

        if let Some(fields) = string_list(args.get("select")) {
            statement.projection = Some(fields);
        }
        if let Some(filter) = args.get("where").and_then(filter_from_value) {
            statement.filter = Some(filter);
        }
        if let Some(sort) = args.get("orderBy").map(sort_from_value) {
            if !sort.is_empty() {
                statement.sort = Some(sort);
            }
        }
        let limit = args.get("take").and_then(Value::as_u64);
        let offset = args.get("skip").and_then(Value::as_u64);
        if limit.is_some() || offset.is_some() {
            statement.pagination = Some(Pagination::new(limit, offset));
        }
        if let Some(includes) = args.get("include").and_then(Value::as_object) {
            let includes = includes
                .iter()
                .map(|(relation, nested)| self.include_for(model, relation, nested))
                .collect::<Vec<_>>();
            if !includes.is_empty() {
                statement.includes = Some(includes);
            }
        }
        if let Some(distinct) = string_list(args.get("distinct")) {
            statement.distinct = Some(distinct);
        }

        match operation {
            // Single-record reads are a window of one over the same shape.
            "findUnique" | "findFirst" => {
                let pagination = statement.pagination.get_or_insert(Pagination::new(None, None));
                pagination.limit = Some(1);
            }
            // Shape disambiguation: a count selects no record fields.
            "count" => statement.projection = Some(vec!["$count".to_string()]),
            "aggregate" => statement.projection = Some(vec!["$aggregate".to_string()]),
            "groupBy" => {
                if let Some(fields) = string_list(args.get("by")) {
                    statement.grouping = Some(Grouping {
                        fields,
                        having: args.get("having").and_then(filter_from_value),
                    });
                }
            }
            _ => {}
        }

        statement
    }

    fn include_for(&self, parent_model: &str, relation: &str, nested: &Value) -> Include {
        // The schema names the relation's target model; fall back to the
        // relation name when the schema does not know it.
        let target_model = self
            .schema
            .model(parent_model)
            .and_then(|model| model.relations.iter().find(|r| r.name == relation))
            .map(|r| r.model.clone())
            .unwrap_or_else(|| relation.to_string());

        let include = Include::relation(relation);
        match nested {
            Value::Object(args) if !args.is_empty() => include.with_statement(
                self.statement_for(&target_model, "findMany", &Value::Object(args.clone())),
            ),
            _ => include,
        }
    }
}

impl OrmMapper for JsonMapper {
    fn operation_kind(&self, call: &OrmCall) -> OperationKind {
        if READ_OPERATIONS.contains(&call.operation.as_str()) {
            OperationKind::Read
        } else if WRITE_OPERATIONS.contains(&call.operation.as_str()) {
            OperationKind::Write
        } else {
            // Unknown operations are treated as writes so the engine
            // over-evicts rather than serving stale data.
            OperationKind::Write
        }
    }

    fn build_statement(&self, call: &OrmCall) -> IkacheResult<Statement> {
        Ok(self.statement_for(&call.model, &call.operation, &call.args))
    }

    fn build_mutation(&self, call: &OrmCall) -> IkacheResult<Mutation> {
        let args = &call.args;
        let model = call.model.as_str();
        let changes = match call.operation.as_str() {
            "create" => vec![Change::Insert {
                model: model.to_string(),
                sets: sets_from(args.get("data")),
            }],
            "createMany" => match args.get("data").and_then(Value::as_array) {
                Some(rows) => rows
                    .iter()
                    .map(|row| Change::Insert {
                        model: model.to_string(),
                        sets: sets_from(Some(row)),
                    })
                    .collect(),
                None => {
                    return Err(IkacheError::Serialization {
                        reason: format!("createMany on {model} requires a data array"),
                    })
                }
            },
            "update" | "updateMany" => {
                let (ids, filter) = target_from(args.get("where"));
                vec![Change::Update {
                    model: model.to_string(),
                    ids,
                    filter,
                    sets: sets_from(args.get("data")),
                }]
            }
            "upsert" => {
                let (ids, filter) = target_from(args.get("where"));
                vec![
                    Change::Update {
                        model: model.to_string(),
                        ids,
                        filter,
                        sets: sets_from(args.get("update")),
                    },
                    Change::Insert {
                        model: model.to_string(),
                        sets: sets_from(args.get("create")),
                    },
                ]
            }
            "delete" | "deleteMany" => {
                let (ids, filter) = target_from(args.get("where"));
                vec![Change::Delete {
                    model: model.to_string(),
                    ids,
                    filter,
                }]
            }
            "connect" | "disconnect" => {
                let relation = args
                    .get("relation")
                    .and_then(Value::as_str)
                    .ok_or_else(|| IkacheError::Serialization {
                        reason: format!("{} on {model} requires a relation", call.operation),
                    })?
                    .to_string();
                let target_model = args
                    .get("targetModel")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| relation.clone());
                let target_id = args.get("targetId").cloned().unwrap_or(Value::Null);
                let id = args.get("id").cloned();
                let change = if call.operation == "connect" {
                    Change::Link {
                        model: model.to_string(),
                        id,
                        relation,
                        target_model,
                        target_id,
                    }
                } else {
                    Change::Unlink {
                        model: model.to_string(),
                        id,
                        relation,
                        target_model,
                        target_id,
                    }
                };
                vec![change]
            }
            // Unknown write operations touch the whole model so the
            // engine evicts conservatively.
            _ => vec![Change::Update {
                model: model.to_string(),
                ids: None,
                filter: None,
                sets: None,
            }],
        };
        Ok(Mutation::new(changes))
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

fn sets_from(value: Option<&Value>) -> Option<Map<String, Value>> {
    value.and_then(Value::as_object).cloned()
}

/// Split a `where` into explicit ids (a bare id equality) or a filter.
fn target_from(where_value: Option<&Value>) -> (Option<Vec<Value>>, Option<FilterNode>) {
    let Some(where_obj) = where_value.and_then(Value::as_object) else {
        return (None, None);
    };
    if where_obj.len() == 1 {
        if let Some(id_value) = where_obj.get("id") {
            match id_value {
                Value::Object(ops) => {
                    if let Some(ids) = ops.get("in").and_then(Value::as_array) {
                        if ops.len() == 1 {
                            return (Some(ids.clone()), None);
                        }
                    }
                }
                scalar => return (Some(vec![scalar.clone()]), None),
            }
        }
    }
    (None, where_value.and_then(filter_from_value))
}

/// Translate a `where` object into a filter tree.
fn filter_from_value(value: &Value) -> Option<FilterNode> {
    let obj = value.as_object()?;
    let mut children = Vec::new();
    for (key, nested) in obj {
        match key.as_str() {
            "AND" => {
                if let Some(items) = nested.as_array() {
                    let group: Vec<_> = items.iter().filter_map(filter_from_value).collect();
                    if !group.is_empty() {
                        children.push(FilterNode::and(group));
                    }
                }
            }
            "OR" => {
                if let Some(items) = nested.as_array() {
                    let group: Vec<_> = items.iter().filter_map(filter_from_value).collect();
                    if !group.is_empty() {
                        children.push(FilterNode::or(group));
                    }
                }
            }
            "NOT" => {
                if let Some(inner) = filter_from_value(nested) {
                    children.push(FilterNode::not(inner));
                }
            }
            field => match nested {
                Value::Object(ops) => {
                    for (op, operand) in ops {
                        children.push(FilterNode::Condition(Condition {
                            field: field.to_string(),
                            path: None,
                            operator: operator_for(op),
                            value: operand.clone(),
                        }));
                    }
                }
                scalar => children.push(FilterNode::eq(field, scalar.clone())),
            },
        }
    }
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(FilterNode::and(children)),
    }
}

/// Map an ORM operator key to the canonical operator set.
fn operator_for(op: &str) -> FilterOperator {
    match op {
        "equals" => FilterOperator::Eq,
        "not" => FilterOperator::Ne,
        "gt" => FilterOperator::Gt,
        "gte" => FilterOperator::Gte,
        "lt" => FilterOperator::Lt,
        "lte" => FilterOperator::Lte,
        "in" => FilterOperator::In,
        "notIn" => FilterOperator::NotIn,
        "contains" => FilterOperator::Contains,
        "startsWith" => FilterOperator::StartsWith,
        "endsWith" => FilterOperator::EndsWith,
        imprecise if IMPRECISE_OPERATORS.contains(&imprecise) => {
            FilterOperator::Unsupported(imprecise.to_string())
        }
        unknown => FilterOperator::Unknown(unknown.to_string()),
    }
}

fn sort_from_value(value: &Value) -> Vec<SortSpec> {
    match value {
        Value::Array(items) => items.iter().flat_map(sort_from_value).collect(),
        Value::Object(fields) => fields
            .iter()
            .map(|(field, direction)| SortSpec {
                field: field.clone(),
                direction: match direction.as_str() {
                    Some("desc") => SortDirection::Desc,
                    _ => SortDirection::Asc,
                },
            })
            .collect(),
        _ => Vec::new(),
    }
}
