//! Stream and scheduler counters.

use std::fmt;

use crate::role::StreamRole;
use crate::stream::StreamId;

/// Counters of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetrics {
    /// Stream id.
    pub stream_id: StreamId,
    /// Backend tag.
    pub device_tag: &'static str,
    /// Stream role.
    pub role: StreamRole,
    /// Device id.
    pub device_id: i64,
    /// Instructions the backend accepted. A compute that returns an error
    /// is counted in `failed` only.
    pub launched: u64,
    /// Instructions observed done.
    pub completed: u64,
    /// Instructions that failed.
    pub failed: u64,
}

impl StreamMetrics {
    /// Instructions launched but not yet observed done.
    pub fn in_flight(&self) -> u64 {
        self.launched.saturating_sub(self.completed)
    }
}

impl fmt::Display for StreamMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{} dev {}]: {} launched, {} completed, {} failed",
            self.stream_id,
            self.device_tag,
            self.role,
            self.device_id,
            self.launched,
            self.completed,
            self.failed
        )
    }
}

/// Scheduler-wide counters.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Instructions submitted.
    pub submitted: u64,
    /// Instructions reaped successfully.
    pub completed: u64,
    /// Instructions that failed at launch or on the backend.
    pub failed: u64,
    /// Instructions currently awaiting completion.
    pub in_flight: usize,
    /// Per-stream counters.
    pub streams: Vec<StreamMetrics>,
}

impl SchedulerStats {
    /// Stream with the most launches.
    pub fn busiest_stream(&self) -> Option<StreamId> {
        self.streams
            .iter()
            .max_by_key(|m| m.launched)
            .map(|m| m.stream_id)
    }
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scheduler: {} submitted, {} completed, {} failed, {} in flight over {} streams",
            self.submitted,
            self.completed,
            self.failed,
            self.in_flight,
            self.streams.len()
        )
    }
}
