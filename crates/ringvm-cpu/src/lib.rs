//! # RingVM CPU Backend
//!
//! Stream types for CPU devices. Registered by [`default_registry`] for
//! every stream role on [`DeviceKind::Cpu`](ringvm_core::DeviceKind::Cpu):
//!
//! | Role | Stream type | Completion |
//! |------|-------------|------------|
//! | `Compute` | [`CpuStreamType`] | Deferred, worker thread |
//! | `Host2Device`, `Device2Host`, `Barrier` | [`HostStreamType`] | Inline |
//! | `HostMemory` | [`DeviceHelperStreamType`] | Inline |
//!
//! All of them report the device tag `"cpu"`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compute;
pub mod helper;
pub mod host;
pub mod memory;
pub mod registry;

/// Device tag shared by every CPU stream type.
pub const CPU_DEVICE_TAG: &str = "cpu";

pub use compute::{CpuDeviceContext, CpuStreamType};
pub use helper::{DeviceHelperStreamType, HelperDeviceContext};
pub use host::{HostDeviceContext, HostStreamType};
pub use memory::{HostMemoryTable, PinnedMemory};
pub use registry::{default_registry, register_cpu_stream_types, StreamTypeKind, DEFAULT_STREAM_TYPES};
