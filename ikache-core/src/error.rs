//! Error types for ikache operations

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Symbolic form of the dependency engine's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorCode {
    AbiMismatch,
    ContractVersionMismatch,
    SchemaInvalid,
    QueryInvalid,
    ResultShapeMismatch,
    MutationInvalid,
    UnsupportedOperator,
    EngineState,
    Internal,
}

impl EngineErrorCode {
    /// Map a raw non-zero status to its symbolic code.
    ///
    /// Unlisted statuses collapse to `Internal`; status 0 is success and
    /// has no code.
    pub fn from_status(status: u32) -> Option<Self> {
        match status {
            0 => None,
            1 => Some(Self::AbiMismatch),
            2 => Some(Self::ContractVersionMismatch),
            3 => Some(Self::SchemaInvalid),
            4 => Some(Self::QueryInvalid),
            5 => Some(Self::ResultShapeMismatch),
            6 => Some(Self::MutationInvalid),
            7 => Some(Self::UnsupportedOperator),
            8 => Some(Self::EngineState),
            _ => Some(Self::Internal),
        }
    }

    pub fn status(self) -> u32 {
        match self {
            Self::AbiMismatch => 1,
            Self::ContractVersionMismatch => 2,
            Self::SchemaInvalid => 3,
            Self::QueryInvalid => 4,
            Self::ResultShapeMismatch => 5,
            Self::MutationInvalid => 6,
            Self::UnsupportedOperator => 7,
            Self::EngineState => 8,
            Self::Internal => 255,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::AbiMismatch => "ABI_MISMATCH",
            Self::ContractVersionMismatch => "CONTRACT_VERSION_MISMATCH",
            Self::SchemaInvalid => "SCHEMA_INVALID",
            Self::QueryInvalid => "QUERY_INVALID",
            Self::ResultShapeMismatch => "RESULT_SHAPE_MISMATCH",
            Self::MutationInvalid => "MUTATION_INVALID",
            Self::UnsupportedOperator => "UNSUPPORTED_OPERATOR",
            Self::EngineState => "ENGINE_STATE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Error raised by the dependency engine.
///
/// Non-recoverable at the coordinator layer; propagates to the caller
/// verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct EngineError {
    pub code: EngineErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: EngineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Synthetic error built from a raw status when the engine's own error
    /// payload could not be read.
    pub fn from_status(status: u32) -> Self {
        let code = EngineErrorCode::from_status(status).unwrap_or(EngineErrorCode::Internal);
        Self {
            code,
            message: format!("engine returned status {status}"),
        }
    }
}

/// Schema loading and validation errors. Fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema has no models")]
    NoModels,

    #[error("Model at index {index} has an empty name")]
    UnnamedModel { index: usize },

    #[error("Composite id on model {model} has no fields")]
    EmptyCompositeId { model: String },

    #[error("Failed to read schema file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse schema: {reason}")]
    Parse { reason: String },
}

/// A database error shared across single-flight waiters.
///
/// Wraps the original error untransformed so every waiter observes the same
/// source; `source()` exposes it for downcasting.
#[derive(Debug, Clone)]
pub struct DbError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl DbError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Wrap a bare message. For drivers that surface errors as strings.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(MessageError(message.into())))
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MessageError {}

/// Master error type for all ikache operations.
#[derive(Debug, Clone, Error)]
pub enum IkacheError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Query execution timed out after {timeout_ms}ms")]
    SingleFlightTimeout { timeout_ms: u64 },
}

/// Result type alias for ikache operations.
pub type IkacheResult<T> = Result<T, IkacheError>;
