//! MPEG-2 Transport Stream primitives for the packet rewriters: header
//! accessors, unit-size resynchronization, section (PSI) reassembly, PAT
//! tracking, PES accumulation and the CRC algorithms the tables use.

pub mod crc;
pub mod error;
pub mod packet;
pub mod pat;
pub mod pes;
pub mod psi;
pub mod sync;

pub use error::TsError;
pub use packet::{PACKET_SIZE, PID_NIT, PID_NULL, PID_PAT};
pub use pat::{Pat, PmtRef};
pub use pes::PesAccumulator;
pub use psi::PsiSection;

/// Result type for TS parsing operations
pub type Result<T> = std::result::Result<T, TsError>;
