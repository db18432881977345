use thiserror::Error;

/// Errors produced by the fallible TS parse helpers.
///
/// The streaming reassemblers ([`crate::PsiSection`], [`crate::PesAccumulator`])
/// never surface errors: a malformed input resets their state and the stream
/// continues at the next unit start.
#[derive(Error, Debug)]
pub enum TsError {
    #[error("Invalid packet size: expected 188 bytes, got {0}")]
    InvalidPacketSize(usize),

    #[error("Invalid sync byte: expected 0x47, got 0x{0:02x}")]
    InvalidSyncByte(u8),

    #[error("Invalid PES start code")]
    InvalidStartCode,

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },
}
