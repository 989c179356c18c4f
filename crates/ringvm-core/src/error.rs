//! Error types for RingVM.

use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceKind;
use crate::instruction::{InstructionId, InstructionStage};
use crate::object_id::LogicalObjectId;
use crate::role::StreamRole;

/// Result type for RingVM operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors that can occur in the stream execution core.
#[derive(Error, Debug)]
pub enum VmError {
    /// No stream type is registered for the requested role and device kind.
    ///
    /// This is a deployment mismatch, callers are expected to treat it as fatal.
    #[error("no stream type registered for role {role} on device kind {kind}")]
    StreamTypeNotRegistered {
        /// Requested stream role.
        role: StreamRole,
        /// Requested device kind.
        kind: DeviceKind,
    },

    /// The backend cannot execute this instruction payload.
    #[error("stream type '{tag}' cannot execute {payload} instructions")]
    UnsupportedInstruction {
        /// Device tag of the rejecting backend.
        tag: &'static str,
        /// Payload name.
        payload: &'static str,
    },

    /// An instruction failed while executing on its backend.
    #[error("instruction {instruction} failed: {reason}")]
    InstructionFailed {
        /// Failed instruction.
        instruction: InstructionId,
        /// Failure description.
        reason: String,
    },

    /// Instruction lifecycle misuse.
    #[error("invalid instruction state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        /// Current stage.
        from: InstructionStage,
        /// Requested stage.
        to: InstructionStage,
    },

    /// Addressed object does not exist.
    #[error("object {0} not found")]
    ObjectNotFound(LogicalObjectId),

    /// Addressed object lives on another machine.
    #[error("object {0} is not addressable from this machine")]
    RemoteObject(LogicalObjectId),

    /// Addressed object already exists.
    #[error("object {0} already exists")]
    ObjectAlreadyExists(LogicalObjectId),

    /// Host memory allocation failed.
    #[error("host allocation of {size} bytes failed")]
    HostAllocationFailed {
        /// Requested size in bytes.
        size: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Polling did not drain in time.
    #[error("timed out after {0:?} waiting for in-flight instructions")]
    Timeout(Duration),

    /// Generic backend failure.
    #[error("backend error: {0}")]
    BackendError(String),
}

impl VmError {
    /// Returns true for errors that indicate a build or deployment mismatch.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            VmError::StreamTypeNotRegistered { .. } | VmError::InvalidConfig(_)
        )
    }
}
