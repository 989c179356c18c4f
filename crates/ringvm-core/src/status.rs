//! Instruction status buffers.
//!
//! A status buffer is a small fixed-size byte region whose contents belong
//! to the stream type that created it. The scheduler never reads the bytes;
//! it only passes the buffer back through
//! [`StreamType::query_instruction_status_done`](crate::stream_type::StreamType::query_instruction_status_done)
//! and [`StreamType::delete_instruction_status`](crate::stream_type::StreamType::delete_instruction_status).
//!
//! Ownership encodes the lifecycle: `init` returns the buffer by value,
//! `query` borrows it and `delete` consumes it, so a deleted buffer cannot be
//! queried again.

use std::fmt;

use crate::stream::StreamId;

/// Capacity of every status buffer in bytes.
pub const INSTRUCTION_STATUS_BUFFER_BYTES: usize = 64;

/// Backend-defined completion bookkeeping for one instruction.
pub struct InstructionStatusBuffer {
    stream_id: StreamId,
    bytes: [u8; INSTRUCTION_STATUS_BUFFER_BYTES],
}

impl InstructionStatusBuffer {
    /// Create a zeroed buffer owned by the given stream.
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            bytes: [0u8; INSTRUCTION_STATUS_BUFFER_BYTES],
        }
    }

    /// Stream that created this buffer.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Raw contents.
    pub fn as_bytes(&self) -> &[u8; INSTRUCTION_STATUS_BUFFER_BYTES] {
        &self.bytes
    }

    /// Mutable raw contents.
    pub fn as_mut_bytes(&mut self) -> &mut [u8; INSTRUCTION_STATUS_BUFFER_BYTES] {
        &mut self.bytes
    }

    /// Read a little-endian `u64` at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 8` exceeds the buffer capacity.
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.bytes[offset..offset + 8]);
        u64::from_le_bytes(word)
    }

    /// Write a little-endian `u64` at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 8` exceeds the buffer capacity.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

impl fmt::Debug for InstructionStatusBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstructionStatusBuffer")
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}

/// Status layout for synchronous backends: a single done flag.
///
/// The instruction finishes inside `compute`, which sets the flag; queries
/// just read it back.
pub struct NaiveStatus;

impl NaiveStatus {
    const DONE_OFFSET: usize = 0;

    /// Reset the flag.
    pub fn init(buffer: &mut InstructionStatusBuffer) {
        buffer.as_mut_bytes()[Self::DONE_OFFSET] = 0;
    }

    /// Mark the instruction finished.
    pub fn set_done(buffer: &mut InstructionStatusBuffer) {
        buffer.as_mut_bytes()[Self::DONE_OFFSET] = 1;
    }

    /// Check the flag.
    pub fn is_done(buffer: &InstructionStatusBuffer) -> bool {
        buffer.as_bytes()[Self::DONE_OFFSET] != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_access() {
        let mut buffer = InstructionStatusBuffer::new(StreamId::from_raw(1));
        buffer.write_u64(8, 0xDEAD_BEEF);
        assert_eq!(buffer.read_u64(8), 0xDEAD_BEEF);
        assert_eq!(buffer.read_u64(0), 0);
        assert_eq!(buffer.stream_id(), StreamId::from_raw(1));
    }

    #[test]
    fn test_naive_status() {
        let mut buffer = InstructionStatusBuffer::new(StreamId::from_raw(1));
        NaiveStatus::init(&mut buffer);
        assert!(!NaiveStatus::is_done(&buffer));
        NaiveStatus::set_done(&mut buffer);
        assert!(NaiveStatus::is_done(&buffer));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_word() {
        let buffer = InstructionStatusBuffer::new(StreamId::from_raw(1));
        buffer.read_u64(INSTRUCTION_STATUS_BUFFER_BYTES - 4);
    }
}
