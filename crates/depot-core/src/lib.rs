//! Depot Core - Shared types, wire frames, and name handling
//!
//! This crate contains the foundational types used by the Depot server and
//! client. It has no dependencies on networking or the async runtime.

pub mod config;
pub mod error;
pub mod path;
pub mod protocol;
pub mod types;

pub use config::{Config, ConfigError, Eviction, Fairness, LockConfig, ServerConfig, StorageConfig};
pub use error::*;
pub use protocol::*;
pub use types::*;

/// Maximum bytes read for a single command frame
pub const FRAME_SIZE: usize = 4096;

/// Default chunk size for streaming file contents
pub const TRANSFER_CHUNK_SIZE: usize = 4096;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 5001;

/// Maximum filename length in bytes
pub const MAX_FILENAME_LEN: usize = 255;

/// Suffix of in-flight upload files
pub const TEMP_SUFFIX: &str = ".depot-part";

/// Longest storable name; its staging file must also fit `MAX_FILENAME_LEN`
pub const MAX_NAME_LEN: usize = MAX_FILENAME_LEN - TEMP_SUFFIX.len();

/// Default idle read timeout in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
