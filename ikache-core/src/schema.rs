//! Application schema handed to the dependency engine
//!
//! The schema describes the models, id shapes, and relations the engine
//! tracks dependencies over. It is loaded once at startup from a file or an
//! inline JSON source and validated before any engine call; validation
//! failures are fatal.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// Versioned description of models, ids, and relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSchema {
    pub version: u32,
    pub models: Vec<ModelSchema>,
}

impl AppSchema {
    /// Parse and validate a schema from inline JSON source.
    pub fn from_json(source: &str) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_str(source).map_err(|e| SchemaError::Parse {
            reason: e.to_string(),
        })?;
        schema.validate()?;
        Ok(schema)
    }

    /// Read, parse, and validate a schema file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| SchemaError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&source)
    }

    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Validate structural requirements.
    ///
    /// Models must be non-empty, every model must be named, and composite
    /// ids must list at least one field.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.models.is_empty() {
            return Err(SchemaError::NoModels);
        }
        for (index, model) in self.models.iter().enumerate() {
            if model.name.is_empty() {
                return Err(SchemaError::UnnamedModel { index });
            }
            if let IdDescriptor::Composite { fields } = &model.id {
                if fields.is_empty() {
                    return Err(SchemaError::EmptyCompositeId {
                        model: model.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// One model within the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    pub name: String,
    pub id: IdDescriptor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationSchema>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>, id: IdDescriptor) -> Self {
        Self {
            name: name.into(),
            id,
            relations: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: RelationSchema) -> Self {
        self.relations.push(relation);
        self
    }
}

/// Shape of a model's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IdDescriptor {
    /// Single opaque string id.
    String,
    /// Composite id over a non-empty field list.
    Composite { fields: Vec<String> },
}

/// A named relation from one model to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationSchema {
    pub name: String,
    /// Target model name.
    pub model: String,
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "one-to-many")]
    OneToMany,
    #[serde(rename = "many-to-one")]
    ManyToOne,
    #[serde(rename = "many-to-many")]
    ManyToMany,
}
