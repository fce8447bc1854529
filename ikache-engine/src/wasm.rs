//! WebAssembly client for the dependency engine
//!
//! Marshals UTF-8 JSON through the engine's linear memory: allocate with
//! the engine's `malloc`, copy, call, and unconditionally `free` on exit.
//! Results come back through `take_result` / `last_error` as an
//! `(offset, length)` pair written into the scratch region.
//!
//! Every access to linear memory re-acquires the current view; any engine
//! call may have grown memory and invalidated prior references.

use std::path::Path;

use async_trait::async_trait;
use ikache_core::{
    AppSchema, EngineError, EngineErrorCode, IkacheError, IkacheResult, Mutation, ShapeId,
    Statement,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use wasmtime::{Engine, Instance, Linker, Memory, Module, Store, TypedFunc};

use crate::abi::{self, exports};
use crate::traits::{
    ComputedShapeId, DependencyEngine, EngineVersion, ExplainRequest, InvalidationExplanation,
    InvalidationSet, QueryRegistration, RegisteredQuery,
};

/// Dependency engine hosted in a wasmtime instance.
///
/// The engine is logically single-writer: every ABI call serializes
/// through one internal lock over the store.
pub struct WasmDependencyEngine {
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for WasmDependencyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmDependencyEngine").finish_non_exhaustive()
    }
}

impl WasmDependencyEngine {
    /// Instantiate an engine module from its binary (or WAT) encoding and
    /// verify the required exports.
    pub fn from_module_bytes(bytes: &[u8]) -> IkacheResult<Self> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes).map_err(|e| {
            EngineError::new(
                EngineErrorCode::AbiMismatch,
                format!("engine module rejected: {e}"),
            )
        })?;
        let mut store = Store::new(&engine, ());
        let instance = Linker::<()>::new(&engine)
            .instantiate(&mut store, &module)
            .map_err(|e| {
                EngineError::new(
                    EngineErrorCode::AbiMismatch,
                    format!("engine instantiation failed: {e}"),
                )
            })?;
        let memory = instance.get_memory(&mut store, exports::MEMORY).ok_or_else(|| {
            EngineError::new(
                EngineErrorCode::AbiMismatch,
                format!("engine module does not export {}", exports::MEMORY),
            )
        })?;
        let funcs = EngineFuncs::bind(&instance, &mut store)?;
        let version_func = funcs.version.clone();

        let mut state = EngineState {
            store,
            memory,
            funcs,
        };
        let version: EngineVersion =
            state.call_nullary_json(exports::VERSION, version_func)?;
        tracing::info!(
            core = %version.core,
            contract = %version.contract,
            abi = %version.abi,
            "Dependency engine instantiated"
        );

        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Read an engine module from disk and instantiate it.
    pub fn from_file(path: impl AsRef<Path>) -> IkacheResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            EngineError::new(
                EngineErrorCode::AbiMismatch,
                format!("failed to read engine module {}: {e}", path.display()),
            )
        })?;
        Self::from_module_bytes(&bytes)
    }
}

#[async_trait]
impl DependencyEngine for WasmDependencyEngine {
    async fn version(&self) -> IkacheResult<EngineVersion> {
        let mut state = self.state.lock().await;
        let func = state.funcs.version.clone();
        state.call_nullary_json(exports::VERSION, func)
    }

    async fn set_schema(&self, schema: &AppSchema) -> IkacheResult<()> {
        let mut state = self.state.lock().await;
        let func = state.funcs.set_schema.clone();
        state.call_json_unit(exports::SET_SCHEMA, func, schema)
    }

    async fn compute_shape_id(&self, statement: &Statement) -> IkacheResult<ShapeId> {
        let mut state = self.state.lock().await;
        let func = state.funcs.compute_shape_id.clone();
        let computed: ComputedShapeId =
            state.call_json(exports::COMPUTE_SHAPE_ID, func, statement)?;
        Ok(computed.shape_id)
    }

    async fn add_query(&self, registration: &QueryRegistration) -> IkacheResult<RegisteredQuery> {
        let mut state = self.state.lock().await;
        let func = state.funcs.add_query.clone();
        state.call_json(exports::ADD_QUERY, func, registration)
    }

    async fn invalidate(&self, mutation: &Mutation) -> IkacheResult<InvalidationSet> {
        let mut state = self.state.lock().await;
        let func = state.funcs.invalidate.clone();
        state.call_json(exports::INVALIDATE, func, mutation)
    }

    async fn explain_invalidation(
        &self,
        request: &ExplainRequest,
    ) -> IkacheResult<InvalidationExplanation> {
        let mut state = self.state.lock().await;
        let func = state.funcs.explain_invalidation.clone();
        state.call_json(exports::EXPLAIN_INVALIDATION, func, request)
    }

    async fn reset(&self) -> IkacheResult<()> {
        let mut state = self.state.lock().await;
        let func = state.funcs.reset.clone();
        state.call_nullary_unit(exports::RESET, func)
    }
}

/// Typed handles to the engine's exports.
#[derive(Clone)]
struct EngineFuncs {
    version: TypedFunc<(), u32>,
    set_schema: TypedFunc<(u32, u32), u32>,
    compute_shape_id: TypedFunc<(u32, u32), u32>,
    add_query: TypedFunc<(u32, u32), u32>,
    invalidate: TypedFunc<(u32, u32), u32>,
    explain_invalidation: TypedFunc<(u32, u32), u32>,
    reset: TypedFunc<(), u32>,
    malloc: TypedFunc<u32, u32>,
    free: TypedFunc<(u32, u32), ()>,
    take_result: TypedFunc<(u32, u32), u32>,
    last_error: TypedFunc<(u32, u32), u32>,
}

impl EngineFuncs {
    fn bind(instance: &Instance, store: &mut Store<()>) -> IkacheResult<Self> {
        Ok(Self {
            version: typed(instance, store, exports::VERSION)?,
            set_schema: typed(instance, store, exports::SET_SCHEMA)?,
            compute_shape_id: typed(instance, store, exports::COMPUTE_SHAPE_ID)?,
            add_query: typed(instance, store, exports::ADD_QUERY)?,
            invalidate: typed(instance, store, exports::INVALIDATE)?,
            explain_invalidation: typed(instance, store, exports::EXPLAIN_INVALIDATION)?,
            reset: typed(instance, store, exports::RESET)?,
            malloc: typed(instance, store, exports::MALLOC)?,
            free: typed(instance, store, exports::FREE)?,
            take_result: typed(instance, store, exports::TAKE_RESULT)?,
            last_error: typed(instance, store, exports::LAST_ERROR)?,
        })
    }
}

fn typed<P, R>(
    instance: &Instance,
    store: &mut Store<()>,
    name: &'static str,
) -> IkacheResult<TypedFunc<P, R>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance.get_typed_func::<P, R>(&mut *store, name).map_err(|e| {
        EngineError::new(
            EngineErrorCode::AbiMismatch,
            format!("missing or mistyped export {name}: {e}"),
        )
        .into()
    })
}

struct EngineState {
    store: Store<()>,
    memory: Memory,
    funcs: EngineFuncs,
}

impl EngineState {
    fn call_json<I, O>(
        &mut self,
        name: &'static str,
        func: TypedFunc<(u32, u32), u32>,
        input: &I,
    ) -> IkacheResult<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let payload = to_wire_bytes(input)?;
        self.call_payload_status(name, func, &payload)?;
        self.take_result()
    }

    fn call_json_unit<I: Serialize>(
        &mut self,
        name: &'static str,
        func: TypedFunc<(u32, u32), u32>,
        input: &I,
    ) -> IkacheResult<()> {
        let payload = to_wire_bytes(input)?;
        self.call_payload_status(name, func, &payload)
    }

    fn call_nullary_json<O: DeserializeOwned>(
        &mut self,
        name: &'static str,
        func: TypedFunc<(), u32>,
    ) -> IkacheResult<O> {
        self.call_nullary_unit(name, func)?;
        self.take_result()
    }

    fn call_nullary_unit(
        &mut self,
        name: &'static str,
        func: TypedFunc<(), u32>,
    ) -> IkacheResult<()> {
        let status = func
            .call(&mut self.store, ())
            .map_err(|e| trap(name, &e))?;
        self.check_status(status)
    }

    /// Allocate, copy, call, and free the payload region. The region is
    /// freed on every path, including traps of the main call.
    fn call_payload_status(
        &mut self,
        name: &'static str,
        func: TypedFunc<(u32, u32), u32>,
        payload: &[u8],
    ) -> IkacheResult<()> {
        let (ptr, len) = self.write_payload(payload)?;
        let call_result = func.call(&mut self.store, (ptr, len));
        let free_result = self.funcs.free.call(&mut self.store, (ptr, len));
        let status = call_result.map_err(|e| trap(name, &e))?;
        free_result.map_err(|e| trap(exports::FREE, &e))?;
        self.check_status(status)
    }

    fn write_payload(&mut self, payload: &[u8]) -> IkacheResult<(u32, u32)> {
        let len = payload.len() as u32;
        let ptr = self
            .funcs
            .malloc
            .call(&mut self.store, len)
            .map_err(|e| trap(exports::MALLOC, &e))?;
        if ptr == 0 {
            return Err(
                EngineError::new(EngineErrorCode::Internal, "engine allocation failed").into(),
            );
        }
        // The malloc call may have grown memory; this takes a fresh view.
        // A failed copy still frees the region before propagating.
        if let Err(e) = self.memory.write(&mut self.store, ptr as usize, payload) {
            let _ = self.funcs.free.call(&mut self.store, (ptr, len));
            return Err(EngineError::new(
                EngineErrorCode::Internal,
                format!("payload write out of bounds: {e}"),
            )
            .into());
        }
        Ok((ptr, len))
    }

    fn check_status(&mut self, status: u32) -> IkacheResult<()> {
        if status == abi::STATUS_OK {
            return Ok(());
        }
        Err(self.read_error(status).into())
    }

    /// Decode the engine's error payload; fall back to a synthetic error
    /// from the status table when the payload itself cannot be read.
    fn read_error(&mut self, status: u32) -> EngineError {
        match self.read_report(exports::LAST_ERROR, self.funcs.last_error.clone()) {
            Ok(bytes) => match serde_json::from_slice::<WireError>(&bytes) {
                Ok(wire) => {
                    let code = wire_code(&wire.code).unwrap_or_else(|| {
                        EngineErrorCode::from_status(status).unwrap_or(EngineErrorCode::Internal)
                    });
                    EngineError::new(code, wire.message)
                }
                Err(_) => EngineError::from_status(status),
            },
            Err(_) => EngineError::from_status(status),
        }
    }

    fn take_result<O: DeserializeOwned>(&mut self) -> IkacheResult<O> {
        let bytes = self.read_report(exports::TAKE_RESULT, self.funcs.take_result.clone())?;
        serde_json::from_slice(&bytes).map_err(|e| IkacheError::Serialization {
            reason: format!("engine result was not valid JSON: {e}"),
        })
    }

    /// Run a report call and read the slice its scratch pair addresses.
    fn read_report(
        &mut self,
        name: &'static str,
        func: TypedFunc<(u32, u32), u32>,
    ) -> IkacheResult<Vec<u8>> {
        let status = func
            .call(&mut self.store, (abi::SCRATCH_PTR, abi::SCRATCH_LEN))
            .map_err(|e| trap(name, &e))?;
        if status != abi::STATUS_OK {
            return Err(EngineError::from_status(status).into());
        }
        // Fresh view: the report call itself may have grown memory.
        let data = self.memory.data(&self.store);
        let (offset, length) = abi::decode_scratch_pair(data).ok_or_else(|| {
            EngineError::new(EngineErrorCode::Internal, "scratch region truncated")
        })?;
        let start = offset as usize;
        let end = start.saturating_add(length as usize);
        let slice = data.get(start..end).ok_or_else(|| {
            EngineError::new(
                EngineErrorCode::Internal,
                format!("result region {start}..{end} out of bounds"),
            )
        })?;
        Ok(slice.to_vec())
    }
}

fn trap(name: &str, error: &wasmtime::Error) -> IkacheError {
    EngineError::new(
        EngineErrorCode::Internal,
        format!("engine call {name} trapped: {error}"),
    )
    .into()
}

/// Serialize an ABI payload, rejecting NUL bytes.
fn to_wire_bytes<T: Serialize>(value: &T) -> IkacheResult<Vec<u8>> {
    let bytes = serde_json::to_vec(value).map_err(|e| IkacheError::Serialization {
        reason: e.to_string(),
    })?;
    if bytes.contains(&0) {
        return Err(IkacheError::Serialization {
            reason: "payload contains a NUL byte".to_string(),
        });
    }
    Ok(bytes)
}

#[derive(serde::Deserialize)]
struct WireError {
    code: serde_json::Value,
    #[serde(default)]
    message: String,
}

/// The engine reports error codes either numerically or symbolically.
fn wire_code(value: &serde_json::Value) -> Option<EngineErrorCode> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|status| EngineErrorCode::from_status(status as u32)),
        serde_json::Value::String(symbol) => symbol_code(symbol),
        _ => None,
    }
}

fn symbol_code(symbol: &str) -> Option<EngineErrorCode> {
    Some(match symbol {
        "ABI_MISMATCH" => EngineErrorCode::AbiMismatch,
        "CONTRACT_VERSION_MISMATCH" => EngineErrorCode::ContractVersionMismatch,
        "SCHEMA_INVALID" => EngineErrorCode::SchemaInvalid,
        "QUERY_INVALID" => EngineErrorCode::QueryInvalid,
        "RESULT_SHAPE_MISMATCH" => EngineErrorCode::ResultShapeMismatch,
        "MUTATION_INVALID" => EngineErrorCode::MutationInvalid,
        "UNSUPPORTED_OPERATOR" => EngineErrorCode::UnsupportedOperator,
        "ENGINE_STATE" => EngineErrorCode::EngineState,
        "INTERNAL" => EngineErrorCode::Internal,
        _ => return None,
    })
}
