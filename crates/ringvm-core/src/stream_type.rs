//! Per-backend stream behavior.
//!
//! A [`StreamType`] describes, once per device backend, how streams of that
//! backend manage their device context, track instruction completion and
//! execute instructions. Streams resolve their stream type from the
//! [`StreamTypeRegistry`](crate::registry::StreamTypeRegistry) when they are
//! created and keep it for their whole lifetime.

use std::any::Any;

use crate::error::{Result, VmError};
use crate::instruction::{Instruction, InstructionId};
use crate::resource::{Resource, StreamDescriptor};
use crate::status::InstructionStatusBuffer;
use crate::stream::Stream;

/// Backend side-channel state owned by one stream (for example a command
/// queue and its worker).
pub trait DeviceContext: Any + Send + Sync {
    /// Tag of the backend that created this context.
    fn device_tag(&self) -> &'static str;

    /// Downcast support for the owning stream type.
    fn as_any(&self) -> &dyn Any;

    /// Take the failure recorded for an instruction that ran asynchronously.
    ///
    /// Synchronous backends report failures from `compute` directly and keep
    /// the default.
    fn take_failure(&self, _instruction: InstructionId) -> Option<VmError> {
        None
    }
}

/// Capability contract implemented by each device backend.
///
/// # Status protocol
///
/// For every instruction the caller runs, in order:
///
/// 1. [`init_instruction_status`](Self::init_instruction_status)
/// 2. [`compute`](Self::compute) (or [`run`](Self::run) for a batch)
/// 3. [`query_instruction_status_done`](Self::query_instruction_status_done)
///    until it returns true
/// 4. [`delete_instruction_status`](Self::delete_instruction_status), once
///
/// Once a query returned true, every later query on the same buffer returns
/// true as well.
pub trait StreamType: Send + Sync {
    /// Stable backend identifier, e.g. `"cpu"`.
    fn device_tag(&self) -> &'static str;

    /// Build the device context for a new stream. `None` means the backend
    /// needs no side-channel state.
    fn init_device_context(&self, stream: &Stream) -> Result<Option<Box<dyn DeviceContext>>>;

    /// Create the status buffer for one instruction submission.
    fn init_instruction_status(&self, stream: &Stream) -> InstructionStatusBuffer;

    /// Release whatever the buffer refers to. Called once, after done.
    fn delete_instruction_status(&self, stream: &Stream, status: InstructionStatusBuffer);

    /// Non-blocking completion check.
    fn query_instruction_status_done(
        &self,
        stream: &Stream,
        status: &InstructionStatusBuffer,
    ) -> bool;

    /// Execute one instruction.
    ///
    /// Synchronous backends finish the work and mark the status done before
    /// returning. Asynchronous backends enqueue it and report completion
    /// through their own signal.
    fn compute(&self, stream: &Stream, instruction: &mut Instruction) -> Result<()>;

    /// Execute a batch of instructions in order.
    ///
    /// Each instruction goes through [`Stream::compute`], which moves it to
    /// `Executing` only when its turn comes. The batch stops at the first
    /// failure; instructions after it stay `StatusInitialized`.
    fn run(&self, stream: &Stream, instructions: &mut [Instruction]) -> Result<()> {
        for instruction in instructions.iter_mut() {
            stream.compute(instruction)?;
        }
        Ok(())
    }

    /// Describe how many streams of this type a machine needs.
    fn make_stream_descriptor(&self, resource: &Resource, machine_id: i64) -> StreamDescriptor;
}

/// Constructor registered for a `(role, device kind)` pair.
pub type StreamTypeFactory =
    fn(crate::role::StreamRole, crate::device::DeviceKind) -> Box<dyn StreamType>;
