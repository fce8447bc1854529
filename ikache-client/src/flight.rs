//! Single-flight map for in-flight query executions
//!
//! Concurrent reads of one shape id share a single database execution.
//! Entries carry a generation token: a flight that was released (usually by
//! a waiter's timeout) can tell that it is no longer current and must
//! discard its result instead of repopulating the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ikache_core::{IkacheError, IkacheResult, ShapeId};
use serde_json::Value;
use tokio::sync::watch;

/// Shared settlement of one flight: the result every waiter receives.
pub(crate) type FlightOutcome = IkacheResult<Value>;

type OutcomeCell = Option<FlightOutcome>;

struct Flight {
    generation: u64,
    outcome: watch::Receiver<OutcomeCell>,
}

/// What `join` handed the caller.
pub(crate) enum FlightRole {
    /// First caller for this shape id; runs the execution and settles
    /// every waiter through the publisher.
    Leader {
        generation: u64,
        publisher: watch::Sender<OutcomeCell>,
        outcome: watch::Receiver<OutcomeCell>,
    },
    /// A flight already exists; await its settlement.
    Follower {
        generation: u64,
        outcome: watch::Receiver<OutcomeCell>,
    },
}

#[derive(Default)]
pub(crate) struct FlightMap {
    inner: Mutex<HashMap<String, Flight>>,
    next_generation: AtomicU64,
}

impl FlightMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the flight for a shape id, creating it when absent.
    pub(crate) fn join(&self, shape_id: &ShapeId) -> FlightRole {
        let mut inner = self.inner.lock().unwrap();
        if let Some(flight) = inner.get(shape_id.as_str()) {
            return FlightRole::Follower {
                generation: flight.generation,
                outcome: flight.outcome.clone(),
            };
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (publisher, outcome) = watch::channel(None);
        inner.insert(
            shape_id.as_str().to_string(),
            Flight {
                generation,
                outcome: outcome.clone(),
            },
        );
        FlightRole::Leader {
            generation,
            publisher,
            outcome,
        }
    }

    /// Whether the map still holds this exact flight.
    pub(crate) fn is_current(&self, shape_id: &ShapeId, generation: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        matches!(inner.get(shape_id.as_str()), Some(flight) if flight.generation == generation)
    }

    /// Remove the entry if it still belongs to this generation. Returns
    /// whether the entry was removed. Safe to race: a newer flight under
    /// the same shape id is never touched.
    pub(crate) fn release_if_current(&self, shape_id: &ShapeId, generation: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(shape_id.as_str()) {
            Some(flight) if flight.generation == generation => {
                inner.remove(shape_id.as_str());
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Await a flight's settlement, bounded by the single-flight timeout.
///
/// On timeout the entry is released (identity-checked) so subsequent reads
/// begin a fresh attempt, and the waiter fails with a timeout error.
pub(crate) async fn await_outcome(
    flights: &FlightMap,
    shape_id: &ShapeId,
    generation: u64,
    mut outcome: watch::Receiver<OutcomeCell>,
    timeout: std::time::Duration,
) -> FlightOutcome {
    match tokio::time::timeout(timeout, outcome.wait_for(|cell| cell.is_some())).await {
        Ok(Ok(settled)) => match &*settled {
            Some(outcome) => outcome.clone(),
            // Unreachable under the wait_for predicate.
            None => Err(IkacheError::SingleFlightTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
        // Publisher dropped without settling: the execution task died.
        Ok(Err(_)) => {
            flights.release_if_current(shape_id, generation);
            Err(IkacheError::Database(ikache_core::DbError::msg(
                "query execution aborted before settling",
            )))
        }
        Err(_elapsed) => {
            flights.release_if_current(shape_id, generation);
            Err(IkacheError::SingleFlightTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}
