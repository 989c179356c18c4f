//! # RingVM Core
//!
//! Core traits and types for the RingVM stream execution engine.
//!
//! This crate defines the contract every device backend satisfies and the
//! lifecycle the scheduler drives instructions through. Backends live in
//! their own crates (see `ringvm-cpu`).
//!
//! ## Core Abstractions
//!
//! - [`StreamType`] - Per-backend device context, status and execution behavior
//! - [`Stream`] - Serialized execution lane bound to one device and one role
//! - [`InstructionStatusBuffer`] - Opaque completion bookkeeping, polled without blocking
//! - [`LogicalObjectId`] - Local/remote identity for instruction operands
//! - [`Scheduler`] - Submits instructions and reaps them once done
//!
//! ## Instruction lifecycle
//!
//! ```text
//! Submitted -> StatusInitialized -> Executing -> Done -> StatusDeleted
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use ringvm_core::prelude::*;
//!
//! let thread_ctx = ThreadCtx::new(0, registry);
//! let stream = thread_ctx.add_stream(Device::cpu(0), StreamRole::Barrier)?;
//!
//! let mut scheduler = Scheduler::default();
//! scheduler.submit(&stream, InstructionPayload::Nop)?;
//! scheduler.run_until_idle()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod device;
pub mod error;
pub mod instruction;
pub mod metrics;
pub mod object_id;
pub mod registry;
pub mod resource;
pub mod role;
pub mod scheduler;
pub mod status;
pub mod stream;
pub mod stream_type;
pub mod thread_ctx;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{PollConfig, VmConfig, VmConfigBuilder};
    pub use crate::device::{Device, DeviceKind};
    pub use crate::error::{Result, VmError};
    pub use crate::instruction::{
        Instruction, InstructionId, InstructionPayload, InstructionStage, LaunchFn,
    };
    pub use crate::metrics::{SchedulerStats, StreamMetrics};
    pub use crate::object_id::LogicalObjectId;
    pub use crate::registry::StreamTypeRegistry;
    pub use crate::resource::{Resource, StreamDescriptor};
    pub use crate::role::StreamRole;
    pub use crate::scheduler::{PollOutcome, Scheduler};
    pub use crate::status::{InstructionStatusBuffer, NaiveStatus, INSTRUCTION_STATUS_BUFFER_BYTES};
    pub use crate::stream::{Stream, StreamId};
    pub use crate::stream_type::{DeviceContext, StreamType, StreamTypeFactory};
    pub use crate::thread_ctx::ThreadCtx;
}

// Re-exports for convenience
pub use device::{Device, DeviceKind};
pub use error::{Result, VmError};
pub use instruction::{Instruction, InstructionId, InstructionPayload};
pub use object_id::LogicalObjectId;
pub use registry::StreamTypeRegistry;
pub use role::StreamRole;
pub use scheduler::Scheduler;
pub use status::InstructionStatusBuffer;
pub use stream::{Stream, StreamId};
pub use stream_type::{DeviceContext, StreamType};
pub use thread_ctx::ThreadCtx;
