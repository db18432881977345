//! ADTS/AAC-LC bitstream parsing and transmuxing for broadcast audio.
//!
//! The parsers walk raw-data-block syntax only far enough to locate element
//! boundaries; no audio is decoded. On top of that sit the two channel
//! rewrites broadcast streams need: splitting a dual-mono frame (two SCEs)
//! into two independent streams, and uplifting a mono frame to stereo by
//! duplicating its channel into a CPE.

mod adts;
mod element;
mod error;
pub mod huffman;
mod transmux;

pub use adts::{AdtsHeader, SampleFrequencyIndex};
pub use error::TransmuxError;
pub use transmux::{transmux_dual_mono, transmux_mono_to_stereo};
