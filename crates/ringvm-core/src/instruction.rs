//! Instructions and their execution lifecycle.

use std::fmt;

use crate::error::{Result, VmError};
use crate::object_id::LogicalObjectId;
use crate::status::InstructionStatusBuffer;

/// Unique identifier of a submitted instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionId(u64);

impl InstructionId {
    /// Create from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Compute closure carried by a [`InstructionPayload::Launch`].
pub type LaunchFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Work carried by an instruction.
///
/// The scheduling core never looks inside; each stream type decides which
/// payloads it can execute.
pub enum InstructionPayload {
    /// Does nothing, completes immediately.
    Nop,
    /// Runs a compute closure.
    Launch(LaunchFn),
    /// Allocates pinned host memory for `object`.
    MallocHost {
        /// Object to bind the allocation to.
        object: LogicalObjectId,
        /// Size in bytes.
        size: usize,
    },
    /// Releases pinned host memory bound to `object`.
    FreeHost {
        /// Object whose allocation is released.
        object: LogicalObjectId,
    },
}

impl InstructionPayload {
    /// Wrap a closure as a launch payload.
    pub fn launch<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self::Launch(Box::new(f))
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Launch(_) => "launch",
            Self::MallocHost { .. } => "malloc_host",
            Self::FreeHost { .. } => "free_host",
        }
    }
}

impl fmt::Debug for InstructionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => f.write_str("Nop"),
            Self::Launch(_) => f.write_str("Launch(..)"),
            Self::MallocHost { object, size } => f
                .debug_struct("MallocHost")
                .field("object", object)
                .field("size", size)
                .finish(),
            Self::FreeHost { object } => {
                f.debug_struct("FreeHost").field("object", object).finish()
            }
        }
    }
}

/// Lifecycle stage of an instruction.
///
/// ```text
/// Submitted -> StatusInitialized -> Executing -> Done -> StatusDeleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionStage {
    /// Created and enqueued to a stream.
    Submitted,
    /// Stream type wrote its bookkeeping into a status buffer.
    StatusInitialized,
    /// Handed to the backend.
    Executing,
    /// Status query reported completion.
    Done,
    /// Status buffer released. Terminal.
    StatusDeleted,
}

impl InstructionStage {
    /// Check if moving to `next` respects the lifecycle.
    pub fn can_transition_to(self, next: InstructionStage) -> bool {
        use InstructionStage::*;
        matches!(
            (self, next),
            (Submitted, StatusInitialized)
                | (StatusInitialized, Executing)
                | (Executing, Done)
                | (Done, StatusDeleted)
        )
    }

    /// Check if the stage is terminal.
    pub fn is_terminal(self) -> bool {
        self == InstructionStage::StatusDeleted
    }
}

/// One unit of work submitted to a stream.
pub struct Instruction {
    id: InstructionId,
    payload: Option<InstructionPayload>,
    status: Option<InstructionStatusBuffer>,
    stage: InstructionStage,
}

impl Instruction {
    /// Create a submitted instruction.
    pub fn new(id: InstructionId, payload: InstructionPayload) -> Self {
        Self {
            id,
            payload: Some(payload),
            status: None,
            stage: InstructionStage::Submitted,
        }
    }

    /// Instruction id.
    pub fn id(&self) -> InstructionId {
        self.id
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> InstructionStage {
        self.stage
    }

    /// Payload, if it has not been taken by a backend yet.
    pub fn payload(&self) -> Option<&InstructionPayload> {
        self.payload.as_ref()
    }

    /// Take the payload for execution.
    pub fn take_payload(&mut self) -> Option<InstructionPayload> {
        self.payload.take()
    }

    /// Status buffer, present between init and delete.
    pub fn status(&self) -> Option<&InstructionStatusBuffer> {
        self.status.as_ref()
    }

    /// Mutable status buffer.
    pub fn status_mut(&mut self) -> Option<&mut InstructionStatusBuffer> {
        self.status.as_mut()
    }

    /// Attach a freshly initialized status buffer.
    pub fn attach_status(&mut self, status: InstructionStatusBuffer) -> Result<()> {
        self.transition(InstructionStage::StatusInitialized)?;
        self.status = Some(status);
        Ok(())
    }

    /// Detach the status buffer for deletion.
    pub fn detach_status(&mut self) -> Result<InstructionStatusBuffer> {
        let status = self.status.take().ok_or(VmError::InvalidStateTransition {
            from: self.stage,
            to: InstructionStage::StatusDeleted,
        })?;
        if let Err(e) = self.transition(InstructionStage::StatusDeleted) {
            self.status = Some(status);
            return Err(e);
        }
        Ok(status)
    }

    /// Advance the lifecycle stage.
    pub fn transition(&mut self, next: InstructionStage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(VmError::InvalidStateTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        Ok(())
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("stage", &self.stage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamId;

    #[test]
    fn test_stage_transitions() {
        use InstructionStage::*;
        assert!(Submitted.can_transition_to(StatusInitialized));
        assert!(StatusInitialized.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Done));
        assert!(Done.can_transition_to(StatusDeleted));

        assert!(!Submitted.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(StatusDeleted));
        assert!(!StatusDeleted.can_transition_to(Submitted));
        assert!(StatusDeleted.is_terminal());
    }

    #[test]
    fn test_detach_before_done_rejected() {
        let mut instr = Instruction::new(InstructionId::new(1), InstructionPayload::Nop);
        instr
            .attach_status(InstructionStatusBuffer::new(StreamId::from_raw(1)))
            .unwrap();
        instr.transition(InstructionStage::Executing).unwrap();

        let err = instr.detach_status().unwrap_err();
        assert!(matches!(err, VmError::InvalidStateTransition { .. }));
        // The buffer stays attached after a rejected detach.
        assert!(instr.status().is_some());

        instr.transition(InstructionStage::Done).unwrap();
        assert!(instr.detach_status().is_ok());
        assert_eq!(instr.stage(), InstructionStage::StatusDeleted);
        assert!(instr.status().is_none());
    }

    #[test]
    fn test_payload_taken_once() {
        let mut instr = Instruction::new(
            InstructionId::new(2),
            InstructionPayload::launch(|| Ok(())),
        );
        assert_eq!(instr.payload().map(|p| p.name()), Some("launch"));
        assert!(instr.take_payload().is_some());
        assert!(instr.take_payload().is_none());
    }
}
