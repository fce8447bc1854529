//! Transaction-scoped eviction buffers
//!
//! Writes inside an interactive transaction do not evict immediately; their
//! eviction sets accumulate in a buffer keyed by the transaction handle and
//! apply atomically on commit. The map holds the handle weakly: dropping
//! every strong reference releases the buffer with no explicit cleanup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use ikache_core::ShapeId;
use uuid::Uuid;

/// Opaque per-transaction handle.
///
/// One handle exists per interactive transaction; the facade threads it
/// through every operation running inside the transaction's callback.
#[derive(Debug)]
pub struct TransactionContext {
    id: Uuid,
}

impl TransactionContext {
    /// Create a fresh handle.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { id: Uuid::now_v7() })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

struct TxBuffer {
    handle: Weak<TransactionContext>,
    shapes: HashSet<ShapeId>,
}

/// Weak map from transaction handles to pending eviction sets.
#[derive(Default)]
pub(crate) struct TxBufferMap {
    inner: Mutex<HashMap<Uuid, TxBuffer>>,
}

impl TxBufferMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Open an empty buffer for a transaction. Callers must not begin
    /// twice for one handle.
    pub(crate) fn begin(&self, tx: &Arc<TransactionContext>) {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner);
        inner.insert(
            tx.id,
            TxBuffer {
                handle: Arc::downgrade(tx),
                shapes: HashSet::new(),
            },
        );
    }

    /// Union evictions into the transaction's buffer. Returns false when
    /// no active buffer exists for the handle (the write then evicts
    /// immediately).
    pub(crate) fn buffer(&self, tx: &TransactionContext, evictions: &[ShapeId]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner);
        match inner.get_mut(&tx.id) {
            Some(buffer) => {
                buffer.shapes.extend(evictions.iter().cloned());
                true
            }
            None => false,
        }
    }

    /// Close the buffer and hand back its eviction set (commit). None when
    /// no buffer exists.
    pub(crate) fn take(&self, tx: &TransactionContext) -> Option<HashSet<ShapeId>> {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner);
        inner.remove(&tx.id).map(|buffer| buffer.shapes)
    }

    /// Drop the buffer without applying it (rollback). No-op when absent.
    pub(crate) fn discard(&self, tx: &TransactionContext) {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner);
        inner.remove(&tx.id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner);
        inner.len()
    }
}

/// Drop buffers whose transaction handle has been released.
fn prune(inner: &mut HashMap<Uuid, TxBuffer>) {
    inner.retain(|_, buffer| buffer.handle.strong_count() > 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_accumulates_a_set() {
        let map = TxBufferMap::new();
        let tx = TransactionContext::new();
        map.begin(&tx);

        assert!(map.buffer(&tx, &[ShapeId::from("A"), ShapeId::from("B")]));
        assert!(map.buffer(&tx, &[ShapeId::from("B"), ShapeId::from("C")]));

        let shapes = map.take(&tx).unwrap();
        assert_eq!(shapes.len(), 3);
        assert!(shapes.contains(&ShapeId::from("A")));
        assert!(shapes.contains(&ShapeId::from("C")));
    }

    #[test]
    fn test_buffer_without_begin_reports_inactive() {
        let map = TxBufferMap::new();
        let tx = TransactionContext::new();
        assert!(!map.buffer(&tx, &[ShapeId::from("A")]));
        assert!(map.take(&tx).is_none());
    }

    #[test]
    fn test_discard_drops_without_applying() {
        let map = TxBufferMap::new();
        let tx = TransactionContext::new();
        map.begin(&tx);
        map.buffer(&tx, &[ShapeId::from("A")]);
        map.discard(&tx);
        assert!(map.take(&tx).is_none());
    }

    #[test]
    fn test_dropping_the_handle_releases_the_buffer() {
        let map = TxBufferMap::new();
        let tx = TransactionContext::new();
        map.begin(&tx);
        map.buffer(&tx, &[ShapeId::from("A")]);
        assert_eq!(map.len(), 1);

        drop(tx);
        assert_eq!(map.len(), 0);
    }
}
