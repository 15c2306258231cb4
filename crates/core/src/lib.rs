//! Core types, transcoding and storage contracts for usage ingestion.

pub mod cast;
pub mod clock;
pub mod compression;
pub mod error;
pub mod limits;
pub mod memory;
pub mod organization;
pub mod report;
pub mod store;
pub mod transcode;

pub use cast::{cast_value, CastValue};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{compress, decompress};
pub use error::{Error, Result, TranscodeError};
pub use organization::*;
pub use report::*;
pub use transcode::*;
