//! Device helper streams managing pinned host memory.
//!
//! A helper stream serves the `HostMemory` role: it executes `MallocHost`
//! and `FreeHost` instructions against a per-stream [`HostMemoryTable`].
//! Both complete before `compute` returns.

use std::any::Any;

use tracing::{debug, info, warn};

use ringvm_core::error::{Result, VmError};
use ringvm_core::instruction::{Instruction, InstructionPayload};
use ringvm_core::resource::{Resource, StreamDescriptor};
use ringvm_core::status::{InstructionStatusBuffer, NaiveStatus};
use ringvm_core::stream_type::{DeviceContext, StreamType};
use ringvm_core::{DeviceKind, Stream, StreamRole};

use crate::memory::HostMemoryTable;
use crate::CPU_DEVICE_TAG;

/// Device context owning the pinned allocations of one helper stream.
#[derive(Default)]
pub struct HelperDeviceContext {
    memory: HostMemoryTable,
}

impl HelperDeviceContext {
    /// Pinned allocations of this stream.
    pub fn memory(&self) -> &HostMemoryTable {
        &self.memory
    }
}

impl DeviceContext for HelperDeviceContext {
    fn device_tag(&self) -> &'static str {
        CPU_DEVICE_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HelperDeviceContext {
    fn drop(&mut self) {
        if !self.memory.is_empty() {
            warn!(
                allocations = self.memory.len(),
                bytes = self.memory.allocated_bytes(),
                "Helper stream dropped with live pinned allocations"
            );
        }
    }
}

/// Pinned host memory stream type.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceHelperStreamType;

impl DeviceHelperStreamType {
    /// Create the stream type.
    pub fn new() -> Self {
        Self
    }
}

impl StreamType for DeviceHelperStreamType {
    fn device_tag(&self) -> &'static str {
        CPU_DEVICE_TAG
    }

    fn init_device_context(&self, stream: &Stream) -> Result<Option<Box<dyn DeviceContext>>> {
        info!(stream = %stream.id(), device = stream.device_id(), "Initialized host memory helper");
        Ok(Some(Box::<HelperDeviceContext>::default()))
    }

    fn init_instruction_status(&self, stream: &Stream) -> InstructionStatusBuffer {
        let mut status = InstructionStatusBuffer::new(stream.id());
        NaiveStatus::init(&mut status);
        status
    }

    fn delete_instruction_status(&self, _stream: &Stream, _status: InstructionStatusBuffer) {}

    fn query_instruction_status_done(
        &self,
        _stream: &Stream,
        status: &InstructionStatusBuffer,
    ) -> bool {
        NaiveStatus::is_done(status)
    }

    fn compute(&self, stream: &Stream, instruction: &mut Instruction) -> Result<()> {
        let ctx = stream.device_ctx_as::<HelperDeviceContext>().ok_or_else(|| {
            VmError::BackendError(format!("{} has no helper device context", stream.id()))
        })?;

        match instruction.take_payload() {
            Some(InstructionPayload::MallocHost { object, size }) => {
                ctx.memory.allocate(object, size)?;
                debug!(stream = %stream.id(), %object, size, "Allocated pinned host memory");
            }
            Some(InstructionPayload::FreeHost { object }) => {
                ctx.memory.free(object)?;
                debug!(stream = %stream.id(), %object, "Freed pinned host memory");
            }
            Some(InstructionPayload::Nop) => {}
            Some(InstructionPayload::Launch(f)) => f()?,
            None => {
                return Err(VmError::BackendError(format!(
                    "instruction {} has no payload",
                    instruction.id()
                )))
            }
        }

        if let Some(status) = instruction.status_mut() {
            NaiveStatus::set_done(status);
        }
        Ok(())
    }

    fn make_stream_descriptor(&self, resource: &Resource, machine_id: i64) -> StreamDescriptor {
        let device_num = resource.max_device_num();
        StreamDescriptor {
            device_tag: self.device_tag(),
            role: StreamRole::HostMemory,
            device_kind: DeviceKind::Cpu,
            num_machines: 1,
            num_streams_per_machine: device_num,
            num_streams_per_thread: device_num,
            start_global_device_id: machine_id * device_num as i64,
        }
    }
}
