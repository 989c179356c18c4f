//! Stream types used by the unit tests of this crate.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{Device, DeviceKind};
use crate::error::{Result, VmError};
use crate::instruction::{Instruction, InstructionId, InstructionPayload};
use crate::registry::StreamTypeRegistry;
use crate::resource::{Resource, StreamDescriptor};
use crate::role::StreamRole;
use crate::status::{InstructionStatusBuffer, NaiveStatus};
use crate::stream::Stream;
use crate::stream_type::{DeviceContext, StreamType};
use crate::thread_ctx::ThreadCtx;

/// Context counting executed instructions.
#[derive(Default)]
pub struct CounterContext {
    pub executed: AtomicU64,
}

impl DeviceContext for CounterContext {
    fn device_tag(&self) -> &'static str {
        "sync"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Runs instructions inline and flags the status done.
pub struct SyncStreamType;

impl StreamType for SyncStreamType {
    fn device_tag(&self) -> &'static str {
        "sync"
    }

    fn init_device_context(&self, _stream: &Stream) -> Result<Option<Box<dyn DeviceContext>>> {
        Ok(Some(Box::<CounterContext>::default()))
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
            None => return Err(VmError::BackendError("payload already taken".into())),
        }
        if let Some(ctx) = stream.device_ctx_as::<CounterContext>() {
            ctx.executed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(status) = instruction.status_mut() {
            NaiveStatus::set_done(status);
        }
        Ok(())
    }

    fn make_stream_descriptor(&self, resource: &Resource, machine_id: i64) -> StreamDescriptor {
        StreamDescriptor {
            device_tag: self.device_tag(),
            role: StreamRole::Barrier,
            device_kind: DeviceKind::Cpu,
            num_machines: 1,
            num_streams_per_machine: resource.cpu_device_num,
            num_streams_per_thread: 1,
            start_global_device_id: machine_id * resource.cpu_device_num as i64,
        }
    }
}

/// Context whose instructions finish only when the test releases them.
#[derive(Default)]
pub struct GateContext {
    issued: AtomicU64,
    released: AtomicU64,
    failures: Mutex<Vec<(InstructionId, String)>>,
}

impl GateContext {
    /// Let every issued instruction complete.
    pub fn release_all(&self) {
        self.released
            .store(self.issued.load(Ordering::Acquire), Ordering::Release);
    }

    /// Let the next `n` issued instructions complete.
    pub fn release(&self, n: u64) {
        let issued = self.issued.load(Ordering::Acquire);
        let released = self.released.load(Ordering::Acquire);
        self.released
            .store((released + n).min(issued), Ordering::Release);
    }
}

impl DeviceContext for GateContext {
    fn device_tag(&self) -> &'static str {
        "gated"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn take_failure(&self, instruction: InstructionId) -> Option<VmError> {
        let mut failures = self.failures.lock();
        let pos = failures.iter().position(|(id, _)| *id == instruction)?;
        let (_, reason) = failures.remove(pos);
        Some(VmError::InstructionFailed {
            instruction,
            reason,
        })
    }
}

const TICKET_OFFSET: usize = 0;

/// Deferred completion: tickets complete when the gate is released.
pub struct GatedStreamType;

impl StreamType for GatedStreamType {
    fn device_tag(&self) -> &'static str {
        "gated"
    }

    fn init_device_context(&self, _stream: &Stream) -> Result<Option<Box<dyn DeviceContext>>> {
        Ok(Some(Box::<GateContext>::default()))
    }

    fn init_instruction_status(&self, stream: &Stream) -> InstructionStatusBuffer {
        let mut status = InstructionStatusBuffer::new(stream.id());
        status.write_u64(TICKET_OFFSET, u64::MAX);
        status
    }

    fn delete_instruction_status(&self, _stream: &Stream, _status: InstructionStatusBuffer) {}

    fn query_instruction_status_done(
        &self,
        stream: &Stream,
        status: &InstructionStatusBuffer,
    ) -> bool {
        let ticket = status.read_u64(TICKET_OFFSET);
        match stream.device_ctx_as::<GateContext>() {
            Some(ctx) if ticket != u64::MAX => ctx.released.load(Ordering::Acquire) > ticket,
            _ => false,
        }
    }

    fn compute(&self, stream: &Stream, instruction: &mut Instruction) -> Result<()> {
        let ctx = stream
            .device_ctx_as::<GateContext>()
            .ok_or_else(|| VmError::BackendError("missing gate context".into()))?;
        let ticket = ctx.issued.fetch_add(1, Ordering::AcqRel);
        if let Some(InstructionPayload::Launch(f)) = instruction.take_payload() {
            if let Err(e) = f() {
                ctx.failures.lock().push((instruction.id(), e.to_string()));
            }
        }
        if let Some(status) = instruction.status_mut() {
            status.write_u64(TICKET_OFFSET, ticket);
        }
        Ok(())
    }

    fn make_stream_descriptor(&self, resource: &Resource, machine_id: i64) -> StreamDescriptor {
        StreamDescriptor {
            device_tag: self.device_tag(),
            role: StreamRole::Compute,
            device_kind: DeviceKind::Cpu,
            num_machines: 1,
            num_streams_per_machine: resource.cpu_device_num,
            num_streams_per_thread: 1,
            start_global_device_id: machine_id * resource.cpu_device_num as i64,
        }
    }
}

fn gated(_: StreamRole, _: DeviceKind) -> Box<dyn StreamType> {
    Box::new(GatedStreamType)
}

fn sync(_: StreamRole, _: DeviceKind) -> Box<dyn StreamType> {
    Box::new(SyncStreamType)
}

/// `(Compute, Cpu)` gated, `(Barrier, Cpu)` synchronous.
pub fn test_registry() -> Arc<StreamTypeRegistry> {
    Arc::new(
        StreamTypeRegistry::new()
            .with(StreamRole::Compute, DeviceKind::Cpu, gated)
            .with(StreamRole::Barrier, DeviceKind::Cpu, sync),
    )
}

/// Thread context over [`test_registry`].
pub fn test_thread_ctx() -> Arc<ThreadCtx> {
    ThreadCtx::new(0, test_registry())
}

/// A CPU stream for `role` on device 0.
pub fn test_stream(role: StreamRole) -> Arc<Stream> {
    test_thread_ctx()
        .add_stream(Device::cpu(0), role)
        .expect("test stream")
}
