//! Best-effort observability events for cache activity
//!
//! Every hit, miss, and eviction produces an [`InsightsEvent`]. Delivery is
//! best-effort: a missing or slow consumer never affects the operation that
//! produced the event.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ShapeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightsEventType {
    Hit,
    Miss,
    Evict,
}

/// Aggregate view of the dependencies the engine registered for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependenciesSummary {
    /// Distinct models the query depends on.
    pub model_count: u32,
    /// Individual records the query depends on.
    pub record_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsEvent {
    pub shape_id: ShapeId,
    pub event_type: InsightsEventType,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Present on miss events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies_summary: Option<DependenciesSummary>,
}

impl InsightsEvent {
    pub fn hit(shape_id: ShapeId) -> Self {
        Self::stamped(shape_id, InsightsEventType::Hit, None)
    }

    pub fn miss(shape_id: ShapeId, summary: DependenciesSummary) -> Self {
        Self::stamped(shape_id, InsightsEventType::Miss, Some(summary))
    }

    pub fn evict(shape_id: ShapeId) -> Self {
        Self::stamped(shape_id, InsightsEventType::Evict, None)
    }

    fn stamped(
        shape_id: ShapeId,
        event_type: InsightsEventType,
        dependencies_summary: Option<DependenciesSummary>,
    ) -> Self {
        Self {
            shape_id,
            event_type,
            timestamp: Utc::now().timestamp_millis(),
            dependencies_summary,
        }
    }
}
