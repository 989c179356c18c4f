//! Synchronous host streams for transfer and barrier roles.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use ringvm_core::error::{Result, VmError};
use ringvm_core::instruction::{Instruction, InstructionPayload};
use ringvm_core::resource::{Resource, StreamDescriptor};
use ringvm_core::status::{InstructionStatusBuffer, NaiveStatus};
use ringvm_core::stream_type::{DeviceContext, StreamType};
use ringvm_core::{DeviceKind, Stream, StreamRole};

use crate::CPU_DEVICE_TAG;

/// Per-stream counters of a host stream.
#[derive(Debug, Default)]
pub struct HostDeviceContext {
    executed: AtomicU64,
}

impl HostDeviceContext {
    /// Instructions executed on this stream.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

impl DeviceContext for HostDeviceContext {
    fn device_tag(&self) -> &'static str {
        CPU_DEVICE_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Runs instructions inline on the calling thread.
///
/// Used for `Host2Device`, `Device2Host` and `Barrier` on CPU devices, where
/// host and device memory coincide and a transfer is a plain call.
#[derive(Debug, Clone, Copy)]
pub struct HostStreamType {
    role: StreamRole,
}

impl HostStreamType {
    /// Create a host stream type serving `role`.
    pub fn new(role: StreamRole) -> Self {
        Self { role }
    }

    /// Role this stream type was created for.
    pub fn role(&self) -> StreamRole {
        self.role
    }
}

impl StreamType for HostStreamType {
    fn device_tag(&self) -> &'static str {
        CPU_DEVICE_TAG
    }

    fn init_device_context(&self, stream: &Stream) -> Result<Option<Box<dyn DeviceContext>>> {
        debug!(stream = %stream.id(), role = %self.role, "Initialized host stream");
        Ok(Some(Box::<HostDeviceContext>::default()))
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
        match instruction.take_payload() {
            Some(InstructionPayload::Nop) => {}
            Some(InstructionPayload::Launch(f)) => f()?,
            Some(other) => {
                return Err(VmError::UnsupportedInstruction {
                    tag: self.device_tag(),
                    payload: other.name(),
                })
            }
            None => {
                return Err(VmError::BackendError(format!(
                    "instruction {} has no payload",
                    instruction.id()
                )))
            }
        }

        if let Some(ctx) = stream.device_ctx_as::<HostDeviceContext>() {
            ctx.executed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(status) = instruction.status_mut() {
            NaiveStatus::set_done(status);
        }
        trace!(stream = %stream.id(), instruction = %instruction.id(), "Host instruction done");
        Ok(())
    }

    fn make_stream_descriptor(&self, resource: &Resource, machine_id: i64) -> StreamDescriptor {
        let device_num = resource.device_num(DeviceKind::Cpu);
        StreamDescriptor {
            device_tag: self.device_tag(),
            role: self.role,
            device_kind: DeviceKind::Cpu,
            num_machines: 1,
            num_streams_per_machine: device_num,
            // All host streams of a machine share one thread.
            num_streams_per_thread: device_num,
            start_global_device_id: machine_id * device_num as i64,
        }
    }
}
