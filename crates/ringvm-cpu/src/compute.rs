//! Asynchronous CPU compute streams.
//!
//! Each stream owns a worker thread draining a FIFO command queue. `compute`
//! only enqueues; the worker advances a completion watermark after every
//! command, and the status query compares the instruction's ticket against
//! it. Tickets are issued in queue order, so the watermark never moves
//! backwards and a status that reported done stays done.
//!
//! ```text
//! compute ──► [ticket n] ──► channel ──► worker ──► completed = n + 1
//!                                                        ▲
//! query_instruction_status_done(ticket n) ───────────────┘ completed > n
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use ringvm_core::error::{Result, VmError};
use ringvm_core::instruction::{Instruction, InstructionId, InstructionPayload, LaunchFn};
use ringvm_core::resource::{Resource, StreamDescriptor};
use ringvm_core::status::InstructionStatusBuffer;
use ringvm_core::stream_type::{DeviceContext, StreamType};
use ringvm_core::{DeviceKind, Stream, StreamRole};

use crate::CPU_DEVICE_TAG;

const TICKET_OFFSET: usize = 0;
const NOT_ENQUEUED: u64 = u64::MAX;

struct Command {
    ticket: u64,
    instruction: InstructionId,
    work: Option<LaunchFn>,
}

#[derive(Default)]
struct Completion {
    completed: AtomicU64,
    failures: Mutex<HashMap<InstructionId, String>>,
}

/// Command queue and worker of one CPU compute stream.
pub struct CpuDeviceContext {
    sender: Mutex<Option<Sender<Command>>>,
    next_ticket: Mutex<u64>,
    completion: Arc<Completion>,
    worker: Option<JoinHandle<()>>,
}

impl CpuDeviceContext {
    /// Spawn the worker for a stream.
    pub fn spawn(name: String) -> Result<Self> {
        let (sender, receiver) = unbounded::<Command>();
        let completion = Arc::new(Completion::default());
        let shared = Arc::clone(&completion);

        let worker = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                for command in receiver.iter() {
                    if let Some(work) = command.work {
                        let failure = match catch_unwind(AssertUnwindSafe(work)) {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(e.to_string()),
                            Err(_) => Some("launch closure panicked".to_string()),
                        };
                        if let Some(reason) = failure {
                            error!(instruction = %command.instruction, %reason, "CPU instruction failed");
                            shared.failures.lock().insert(command.instruction, reason);
                        }
                    }
                    shared
                        .completed
                        .store(command.ticket + 1, Ordering::Release);
                }
            })
            .map_err(|e| VmError::BackendError(format!("failed to spawn CPU worker: {}", e)))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            next_ticket: Mutex::new(0),
            completion,
            worker: Some(worker),
        })
    }

    /// Queue work and return its ticket.
    fn enqueue(&self, instruction: InstructionId, work: Option<LaunchFn>) -> Result<u64> {
        // Holding the ticket lock across send keeps channel order == ticket order.
        let mut next_ticket = self.next_ticket.lock();
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| VmError::BackendError("CPU worker shut down".to_string()))?;

        let ticket = *next_ticket;
        sender
            .send(Command {
                ticket,
                instruction,
                work,
            })
            .map_err(|_| VmError::BackendError("CPU worker exited".to_string()))?;
        *next_ticket += 1;
        Ok(ticket)
    }

    fn is_complete(&self, ticket: u64) -> bool {
        self.completion.completed.load(Ordering::Acquire) > ticket
    }

    /// Commands the worker has finished.
    pub fn completed(&self) -> u64 {
        self.completion.completed.load(Ordering::Acquire)
    }

    /// Commands queued so far.
    pub fn enqueued(&self) -> u64 {
        *self.next_ticket.lock()
    }

    /// Stop accepting work; the worker drains what is queued and exits.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

impl DeviceContext for CpuDeviceContext {
    fn device_tag(&self) -> &'static str {
        CPU_DEVICE_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn take_failure(&self, instruction: InstructionId) -> Option<VmError> {
        let reason = self.completion.failures.lock().remove(&instruction)?;
        Some(VmError::InstructionFailed {
            instruction,
            reason,
        })
    }
}

impl Drop for CpuDeviceContext {
    fn drop(&mut self) {
        self.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("CPU worker panicked during shutdown");
            }
        }
        debug!(completed = self.completed(), "CPU device context dropped");
    }
}

/// Asynchronous CPU compute backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuStreamType;

impl CpuStreamType {
    /// Create the stream type.
    pub fn new() -> Self {
        Self
    }

    fn context<'a>(&self, stream: &'a Stream) -> Result<&'a CpuDeviceContext> {
        stream
            .device_ctx_as::<CpuDeviceContext>()
            .ok_or_else(|| VmError::BackendError(format!("{} has no CPU device context", stream.id())))
    }
}

impl StreamType for CpuStreamType {
    fn device_tag(&self) -> &'static str {
        CPU_DEVICE_TAG
    }

    fn init_device_context(&self, stream: &Stream) -> Result<Option<Box<dyn DeviceContext>>> {
        let ctx = CpuDeviceContext::spawn(format!("ringvm-cpu-{}", stream.id().as_u64()))?;
        info!(stream = %stream.id(), device = stream.device_id(), "Spawned CPU compute worker");
        Ok(Some(Box::new(ctx)))
    }

    fn init_instruction_status(&self, stream: &Stream) -> InstructionStatusBuffer {
        let mut status = InstructionStatusBuffer::new(stream.id());
        status.write_u64(TICKET_OFFSET, NOT_ENQUEUED);
        status
    }

    fn delete_instruction_status(&self, _stream: &Stream, _status: InstructionStatusBuffer) {
        // Tickets reference no resources.
    }

    fn query_instruction_status_done(
        &self,
        stream: &Stream,
        status: &InstructionStatusBuffer,
    ) -> bool {
        let ticket = status.read_u64(TICKET_OFFSET);
        if ticket == NOT_ENQUEUED {
            return false;
        }
        self.context(stream)
            .map(|ctx| ctx.is_complete(ticket))
            .unwrap_or(false)
    }

    fn compute(&self, stream: &Stream, instruction: &mut Instruction) -> Result<()> {
        let work = match instruction.take_payload() {
            Some(InstructionPayload::Nop) => None,
            Some(InstructionPayload::Launch(f)) => Some(f),
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
        };

        let ticket = self.context(stream)?.enqueue(instruction.id(), work)?;
        if let Some(status) = instruction.status_mut() {
            status.write_u64(TICKET_OFFSET, ticket);
        }
        Ok(())
    }

    fn make_stream_descriptor(&self, resource: &Resource, machine_id: i64) -> StreamDescriptor {
        let device_num = resource.device_num(DeviceKind::Cpu);
        StreamDescriptor {
            device_tag: self.device_tag(),
            role: StreamRole::Compute,
            device_kind: DeviceKind::Cpu,
            num_machines: 1,
            num_streams_per_machine: device_num,
            num_streams_per_thread: 1,
            start_global_device_id: machine_id * device_num as i64,
        }
    }
}
