//! Stream roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Purpose of a stream on its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRole {
    /// Kernel execution.
    Compute,
    /// Host to device copies.
    Host2Device,
    /// Device to host copies.
    Device2Host,
    /// Synchronization points between streams.
    Barrier,
    /// Pinned host memory allocation helper.
    HostMemory,
}

impl StreamRole {
    /// All roles.
    pub const ALL: [StreamRole; 5] = [
        StreamRole::Compute,
        StreamRole::Host2Device,
        StreamRole::Device2Host,
        StreamRole::Barrier,
        StreamRole::HostMemory,
    ];

    /// Stable name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StreamRole::Compute => "compute",
            StreamRole::Host2Device => "host2device",
            StreamRole::Device2Host => "device2host",
            StreamRole::Barrier => "barrier",
            StreamRole::HostMemory => "host_memory",
        }
    }

    /// Whether the role moves data across the host/device boundary.
    pub const fn is_transfer(&self) -> bool {
        matches!(self, StreamRole::Host2Device | StreamRole::Device2Host)
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
