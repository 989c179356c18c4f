//! Streams: serialized execution lanes bound to one device and one role.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::device::Device;
use crate::error::{Result, VmError};
use crate::instruction::{Instruction, InstructionStage};
use crate::metrics::StreamMetrics;
use crate::role::StreamRole;
use crate::status::InstructionStatusBuffer;
use crate::stream_type::{DeviceContext, StreamType};
use crate::thread_ctx::ThreadCtx;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// A serialized execution lane.
///
/// The stream type and device context are fixed at construction; there is
/// no way to re-initialize a stream. All lifecycle wrappers assert that
/// status buffers come from this stream and are only deleted once done.
pub struct Stream {
    id: StreamId,
    thread_ctx: Weak<ThreadCtx>,
    device: Arc<Device>,
    role: StreamRole,
    device_ctx: Option<Box<dyn DeviceContext>>,
    stream_type: Box<dyn StreamType>,
    launched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Stream {
    /// Create a stream for `device` serving `role`.
    ///
    /// Resolves the stream type for `(role, device.kind())` from the thread
    /// context's registry and lets it build the device context. Fails with
    /// [`VmError::StreamTypeNotRegistered`] when no backend serves the pair.
    pub fn new(thread_ctx: &Arc<ThreadCtx>, device: Arc<Device>, role: StreamRole) -> Result<Self> {
        let stream_type = thread_ctx.registry().resolve(role, device.kind())?;

        let mut stream = Self {
            id: StreamId::next(),
            thread_ctx: Arc::downgrade(thread_ctx),
            device,
            role,
            device_ctx: None,
            stream_type,
            launched: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        };
        stream.device_ctx = stream.stream_type.init_device_context(&stream)?;

        info!(
            stream = %stream.id,
            device = %stream.device,
            role = %stream.role,
            tag = stream.stream_type.device_tag(),
            "Created stream"
        );

        Ok(stream)
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Owning thread context, if it is still alive.
    pub fn thread_ctx(&self) -> Option<Arc<ThreadCtx>> {
        self.thread_ctx.upgrade()
    }

    /// Shared device handle.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Device id, read through the device handle.
    pub fn device_id(&self) -> i64 {
        self.device.device_id()
    }

    /// Stream role.
    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Bound stream type.
    pub fn stream_type(&self) -> &dyn StreamType {
        self.stream_type.as_ref()
    }

    /// Device context, if the backend created one.
    pub fn device_ctx(&self) -> Option<&dyn DeviceContext> {
        self.device_ctx.as_deref()
    }

    /// Device context downcast to the backend's concrete type.
    pub fn device_ctx_as<T: DeviceContext>(&self) -> Option<&T> {
        self.device_ctx.as_deref()?.as_any().downcast_ref::<T>()
    }

    /// Create a status buffer for one submission.
    pub fn init_instruction_status(&self) -> InstructionStatusBuffer {
        let status = self.stream_type.init_instruction_status(self);
        self.assert_owned(&status);
        status
    }

    /// Check whether the instruction tracked by `status` finished.
    ///
    /// # Panics
    ///
    /// Panics if `status` was created by another stream.
    pub fn query_instruction_status_done(&self, status: &InstructionStatusBuffer) -> bool {
        self.assert_owned(status);
        self.stream_type.query_instruction_status_done(self, status)
    }

    /// Release a status buffer.
    ///
    /// # Panics
    ///
    /// Panics if `status` was created by another stream or has not reported
    /// done yet.
    pub fn delete_instruction_status(&self, status: InstructionStatusBuffer) {
        assert!(
            self.query_instruction_status_done(&status),
            "{}: status buffer deleted before its instruction finished",
            self.id
        );
        self.stream_type.delete_instruction_status(self, status);
    }

    /// Execute one instruction whose status has been attached.
    pub fn compute(&self, instruction: &mut Instruction) -> Result<()> {
        self.begin_execution(instruction)?;
        self.record_result(self.stream_type.compute(self, instruction))
    }

    /// Execute a batch of instructions whose statuses have been attached.
    ///
    /// On failure, the failed instruction is the last one that left
    /// `StatusInitialized`; the rest of the batch is untouched and can be
    /// resubmitted.
    pub fn run(&self, instructions: &mut [Instruction]) -> Result<()> {
        for instruction in instructions.iter() {
            match instruction.status() {
                Some(status) => self.assert_owned(status),
                None => {
                    return Err(VmError::InvalidStateTransition {
                        from: instruction.stage(),
                        to: InstructionStage::Executing,
                    })
                }
            }
        }
        self.stream_type.run(self, instructions)
    }

    /// Attach a fresh status buffer and execute the instruction.
    pub fn launch(&self, instruction: &mut Instruction) -> Result<()> {
        instruction.attach_status(self.init_instruction_status())?;
        debug!(stream = %self.id, instruction = %instruction.id(), "Launching instruction");
        self.compute(instruction)
    }

    /// Poll an executing instruction, moving it to `Done` once finished.
    pub fn poll(&self, instruction: &mut Instruction) -> Result<bool> {
        match instruction.stage() {
            InstructionStage::Done => return Ok(true),
            InstructionStage::Executing => {}
            other => {
                return Err(VmError::InvalidStateTransition {
                    from: other,
                    to: InstructionStage::Done,
                })
            }
        }

        let done = instruction
            .status()
            .map(|status| self.query_instruction_status_done(status))
            .unwrap_or(false);
        if done {
            instruction.transition(InstructionStage::Done)?;
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(done)
    }

    /// Delete the status of a finished instruction and collect any failure
    /// the backend recorded for it.
    pub fn release(&self, instruction: &mut Instruction) -> Result<()> {
        let status = instruction.detach_status()?;
        self.delete_instruction_status(status);

        match self.device_ctx().and_then(|ctx| ctx.take_failure(instruction.id())) {
            Some(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Counters for this stream.
    pub fn metrics(&self) -> StreamMetrics {
        StreamMetrics {
            stream_id: self.id,
            device_tag: self.stream_type.device_tag(),
            role: self.role,
            device_id: self.device_id(),
            launched: self.launched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn begin_execution(&self, instruction: &mut Instruction) -> Result<()> {
        match instruction.status() {
            Some(status) => self.assert_owned(status),
            None => {
                return Err(VmError::InvalidStateTransition {
                    from: instruction.stage(),
                    to: InstructionStage::Executing,
                })
            }
        }
        instruction.transition(InstructionStage::Executing)?;
        Ok(())
    }

    // `launched` counts only instructions the backend accepted, so a
    // rejected compute never shows up as in flight.
    fn record_result(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => self.launched.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn assert_owned(&self, status: &InstructionStatusBuffer) {
        assert_eq!(
            status.stream_id(),
            self.id,
            "status buffer of {} used with {}",
            status.stream_id(),
            self.id
        );
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("role", &self.role)
            .field("device_tag", &self.stream_type.device_tag())
            .finish_non_exhaustive()
    }
}
