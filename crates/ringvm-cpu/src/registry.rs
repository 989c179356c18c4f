//! Registration of the CPU stream types.

use std::fmt;

use ringvm_core::registry::StreamTypeRegistry;
use ringvm_core::stream_type::{StreamType, StreamTypeFactory};
use ringvm_core::{DeviceKind, StreamRole};

use crate::compute::CpuStreamType;
use crate::helper::DeviceHelperStreamType;
use crate::host::HostStreamType;

/// CPU stream type families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTypeKind {
    /// Queued compute on a worker thread.
    Cpu,
    /// Inline transfers and barriers.
    Host,
    /// Pinned host memory management.
    DeviceHelper,
}

impl StreamTypeKind {
    /// Factory building this family's stream type.
    pub fn factory(self) -> StreamTypeFactory {
        match self {
            StreamTypeKind::Cpu => cpu_stream_type,
            StreamTypeKind::Host => host_stream_type,
            StreamTypeKind::DeviceHelper => device_helper_stream_type,
        }
    }

    /// Family name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StreamTypeKind::Cpu => "cpu",
            StreamTypeKind::Host => "host",
            StreamTypeKind::DeviceHelper => "device_helper",
        }
    }
}

impl fmt::Display for StreamTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every `(role, device kind)` pair the CPU backend serves.
pub const DEFAULT_STREAM_TYPES: [(StreamRole, DeviceKind, StreamTypeKind); 5] = [
    (StreamRole::Compute, DeviceKind::Cpu, StreamTypeKind::Cpu),
    (StreamRole::Host2Device, DeviceKind::Cpu, StreamTypeKind::Host),
    (StreamRole::Device2Host, DeviceKind::Cpu, StreamTypeKind::Host),
    (StreamRole::Barrier, DeviceKind::Cpu, StreamTypeKind::Host),
    (StreamRole::HostMemory, DeviceKind::Cpu, StreamTypeKind::DeviceHelper),
];

fn cpu_stream_type(_role: StreamRole, _kind: DeviceKind) -> Box<dyn StreamType> {
    Box::new(CpuStreamType::new())
}

fn host_stream_type(role: StreamRole, _kind: DeviceKind) -> Box<dyn StreamType> {
    Box::new(HostStreamType::new(role))
}

fn device_helper_stream_type(_role: StreamRole, _kind: DeviceKind) -> Box<dyn StreamType> {
    Box::new(DeviceHelperStreamType::new())
}

/// Add the CPU stream types to `registry`.
pub fn register_cpu_stream_types(registry: &mut StreamTypeRegistry) {
    for (role, kind, family) in DEFAULT_STREAM_TYPES {
        registry.register(role, kind, family.factory());
    }
}

/// A registry holding only the CPU stream types.
pub fn default_registry() -> StreamTypeRegistry {
    let mut registry = StreamTypeRegistry::new();
    register_cpu_stream_types(&mut registry);
    registry
}
