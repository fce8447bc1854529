//! IKACHE Core - Data Model
//!
//! Canonical vocabulary shared by every other crate: statements, mutations,
//! the application schema, insights events, and the error taxonomy. This
//! crate contains data types and validation only - no caching logic.

mod error;
mod insights;
mod mutation;
mod schema;
mod statement;

// Re-export error types
pub use error::*;

// Re-export insights event types
pub use insights::*;

// Re-export mutation types
pub use mutation::*;

// Re-export schema types
pub use schema::*;

// Re-export statement types
pub use statement::*;
