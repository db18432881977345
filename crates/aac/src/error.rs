use thiserror::Error;

/// Why a transmux call gave up on the current frame.
///
/// The workspace has already been flushed or resynchronized when one of
/// these is returned; the caller just keeps feeding payload, so a single
/// malformed frame never halts the stream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmuxError {
    #[error("lost ADTS synchronization")]
    Desync,

    #[error("unsupported sampling frequency index {0}")]
    UnsupportedSamplingFrequency(u8),

    #[error("unsupported channel configuration {0}")]
    UnsupportedChannelConfiguration(u8),

    #[error("malformed raw data block")]
    MalformedFrame,
}
