//! Linear-memory ABI constants for the dependency engine
//!
//! Every ABI function returns a u32 status (0 = OK; see
//! [`ikache_core::EngineErrorCode`] for the non-zero table). Payloads are
//! UTF-8 JSON written into engine-allocated regions; results come back
//! through `take_result` / `last_error`, which write an `(offset, length)`
//! pair of little-endian u32s into the scratch region at offset 0.

/// Offset of the scratch region the engine writes result pairs into.
pub const SCRATCH_PTR: u32 = 0;

/// Size of the scratch region: two little-endian u32s.
pub const SCRATCH_LEN: u32 = 8;

/// Status value signalling success.
pub const STATUS_OK: u32 = 0;

/// Export names required of every engine module.
pub mod exports {
    pub const MEMORY: &str = "memory";
    pub const VERSION: &str = "version";
    pub const SET_SCHEMA: &str = "set_schema";
    pub const COMPUTE_SHAPE_ID: &str = "compute_shape_id";
    pub const ADD_QUERY: &str = "add_query";
    pub const INVALIDATE: &str = "invalidate";
    pub const EXPLAIN_INVALIDATION: &str = "explain_invalidation";
    pub const RESET: &str = "reset";
    pub const MALLOC: &str = "malloc";
    pub const FREE: &str = "free";
    pub const TAKE_RESULT: &str = "take_result";
    pub const LAST_ERROR: &str = "last_error";
}

/// Decode the `(offset, length)` pair the engine wrote into the scratch
/// region.
pub fn decode_scratch_pair(scratch: &[u8]) -> Option<(u32, u32)> {
    if scratch.len() < SCRATCH_LEN as usize {
        return None;
    }
    let offset = u32::from_le_bytes(scratch[0..4].try_into().ok()?);
    let length = u32::from_le_bytes(scratch[4..8].try_into().ok()?);
    Some((offset, length))
}
