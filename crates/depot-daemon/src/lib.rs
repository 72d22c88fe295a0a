//! Depot Daemon - shared-directory file server and client
//!
//! This crate provides:
//! - The TCP server that exposes one flat directory to many clients
//! - Per-name reader/writer locking so transfers never see torn files
//! - A client library speaking the same frame protocol
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              DepotServer (accept loop)                      │
//! │  bounded by a connection semaphore, prunes idle locks       │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ one tokio task per connection
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Session (frame state machine)                │
//! │  LIST / UPLOAD / DOWNLOAD / DELETE / QUIT                   │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage ──► LockRegistry ──► FileLock (per name)           │
//! │  staged uploads, locked reads and deletes                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod lock;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;

pub use client::{ClientError, DepotClient};
pub use lock::{FileLock, LockStatus, ReadGuard, WriteGuard};
pub use registry::LockRegistry;
pub use server::{DepotServer, ServerError};
pub use session::{Session, SessionError, SessionSettings};
pub use storage::{Download, Storage, StorageError, Upload};
