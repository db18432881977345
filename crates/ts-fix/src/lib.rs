//! The streaming packet rewriters.
//!
//! Three independent rewriters share the same shape: the driver hands each
//! one 188-byte packets in multiplex order, output packets accumulate in an
//! owned buffer the driver drains, and nothing here performs I/O (the
//! caption tracer writes decoded text to a sink it was given, which is the
//! point of that rewriter).
//!
//! - [`ServiceFilter`] selects one program and renumbers it to fixed PIDs,
//!   synthesizing PAT/PMT, silent audio and PCR-only packets as needed.
//! - [`CaptionTracer`] decodes ARIB captions to a line-based text trace.
//! - [`Id3Converter`] re-wraps ARIB caption PES as ID3 timed metadata.

mod id3;
mod mux;
mod service;
mod trace;

pub use id3::Id3Converter;
pub use service::ServiceFilter;
pub use trace::CaptionTracer;
