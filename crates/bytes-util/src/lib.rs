//! Bit-level reading and writing primitives shared by the bitstream parsers.

mod bit_cursor;
mod bit_sink;

pub use bit_cursor::BitCursor;
pub use bit_sink::BitSink;
