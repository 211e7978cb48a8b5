//! Backup metadata handling: manifest serialization, encryption-key
//! resolution, backup chain discovery and point-in-time schema
//! reconstruction over external storage destinations.

pub mod codec;
pub mod encryption;
pub mod error;
pub mod guard;
pub mod manifest;
pub mod resolve;
pub mod storage;
pub mod timestamp;

pub use error::{BackupError, Result};
pub use timestamp::Timestamp;
