//! Device handles shared by streams.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of device a stream runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host CPU.
    Cpu,
    /// NVIDIA GPU.
    Cuda,
}

impl DeviceKind {
    /// All device kinds.
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Cpu, DeviceKind::Cuda];

    /// Stable tag string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical device, referenced read-only by any number of streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    kind: DeviceKind,
    device_id: i64,
}

impl Device {
    /// Create a shared device handle.
    pub fn new(kind: DeviceKind, device_id: i64) -> Arc<Self> {
        Arc::new(Self { kind, device_id })
    }

    /// Shorthand for a CPU device.
    pub fn cpu(device_id: i64) -> Arc<Self> {
        Self::new(DeviceKind::Cpu, device_id)
    }

    /// Device kind.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Device index within its kind.
    pub fn device_id(&self) -> i64 {
        self.device_id
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.device_id)
    }
}
