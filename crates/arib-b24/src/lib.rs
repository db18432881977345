//! ARIB STD-B24 caption decoding into an escaped UTF-8 text form.
//!
//! The crate parses caption PES payloads (data groups, caption management
//! and statement data, DRCS definitions) and decodes 8-unit-code or UCS
//! statement bodies. Everything that is not a printable character comes out
//! percent-escaped, so the text form stays reversible.

mod caption;
mod decoder;
mod drcs;
mod tables;
mod text;

pub use caption::{CaptionParser, ParseError};
pub use decoder::decode_units;
pub use drcs::DrcsMap;
