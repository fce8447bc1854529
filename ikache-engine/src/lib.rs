//! IKACHE Engine - Dependency Engine Contract and Client
//!
//! The dependency engine is an external WebAssembly module that owns the
//! dependency graph: it computes shape ids for statements, registers query
//! dependencies, and answers which cached shapes a mutation invalidates.
//! This crate defines the [`DependencyEngine`] trait the coordinator
//! consumes and the linear-memory ABI client that implements it.

pub mod abi;
mod traits;
mod wasm;

pub use traits::{
    ComputedShapeId, DependencyEngine, EngineVersion, ExplainRequest, InvalidationExplanation,
    InvalidationSet, QueryDependency, QueryRegistration, RegisteredQuery,
};
pub use wasm::WasmDependencyEngine;
