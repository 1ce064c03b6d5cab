//! Metadata File Store
//!
//! The reverse map persists through a small capability over named metadata
//! files: existence check, create-with-size, open/close, synchronous bulk
//! I/O and asynchronous submission that completes through an
//! [`AsyncMetaFileIoCtx`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ReverseMapManager / Packs                │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ Arc<dyn MetaFileIntf>
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MetaFileIntf                          │
//! │   exists │ create │ open │ close │ read/write │ submit_io   │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │   FileStore (real files)     │   MockFileIntf (in-memory)   │
//! │   worker-thread completions  │   inline/deferred completions│
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The concrete store is chosen at runtime from [`ArrayConfig::store`]
//! through [`open_store`].

pub mod async_context;
pub mod file;
pub mod mock;

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ArrayConfig, StoreBackend};
use crate::error::{Error, Result, EINVAL};

pub use async_context::{AsyncMetaFileIoCtx, MetaIoCallback};
pub use file::FileStore;
pub use mock::{CompletionMode, MockFileIntf};

// =============================================================================
// Opcode
// =============================================================================

/// Direction of a metadata file I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaFsIoOpcode {
    Read,
    Write,
}

impl std::fmt::Display for MetaFsIoOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaFsIoOpcode::Read => write!(f, "read"),
            MetaFsIoOpcode::Write => write!(f, "write"),
        }
    }
}

// =============================================================================
// File Store Capability
// =============================================================================

/// A named metadata file.
///
/// All methods take `&self`; implementations synchronize internally so one
/// handle can be shared by every pack of an array.
pub trait MetaFileIntf: Send + Sync + std::fmt::Debug {
    /// File name within the array's metadata namespace.
    fn file_name(&self) -> &str;

    /// Descriptor of the open file, `None` when closed.
    fn fd(&self) -> Option<i32>;

    /// Whether the file has been created.
    fn does_file_exist(&self) -> bool;

    /// Create the file with a fixed size. Fails if it already exists.
    fn create(&self, size: u64) -> Result<()>;

    /// Open the file for I/O.
    fn open(&self) -> Result<()>;

    /// Close the file. Waits for submitted asynchronous I/O to complete.
    fn close(&self) -> Result<()>;

    /// Whether the file is open.
    fn is_opened(&self) -> bool;

    /// Size of the file in bytes (0 if absent).
    fn file_size(&self) -> u64;

    /// Synchronous read of `buf.len()` bytes at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Synchronous write of `buf` at `offset`.
    fn write(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Submit an asynchronous request.
    ///
    /// Returns once the request is queued. The context's callback fires
    /// later, exactly once, on a store-owned execution context. When this
    /// returns `Err` the context is dropped and its callback never runs.
    fn submit_io(&self, ctx: AsyncMetaFileIoCtx) -> Result<()>;

    /// I/O counters for this file.
    fn stats(&self) -> &MetaIoStats;
}

/// Open (construct) the store selected by the configuration.
///
/// The file is neither created nor opened; callers drive that lifecycle.
pub fn open_store(config: &ArrayConfig, file_name: &str) -> Arc<dyn MetaFileIntf> {
    match config.store {
        StoreBackend::File => Arc::new(FileStore::new(config.array_meta_dir(), file_name)),
        StoreBackend::Mock => Arc::new(MockFileIntf::new(file_name, config.array_id)),
    }
}

static NEXT_FD: AtomicI32 = AtomicI32::new(3);

/// Allocate a descriptor number for a newly opened metadata file.
pub(crate) fn alloc_fd() -> i32 {
    NEXT_FD.fetch_add(1, Ordering::Relaxed)
}

/// Reject requests that do not fit in `[0, file_size)`.
pub(crate) fn check_range(
    file: &str,
    opcode: MetaFsIoOpcode,
    offset: u64,
    length: u64,
    file_size: u64,
) -> Result<()> {
    let fits = offset
        .checked_add(length)
        .is_some_and(|end| end <= file_size);
    if fits {
        Ok(())
    } else {
        Err(Error::MetaFileIo {
            file: file.to_string(),
            opcode,
            offset,
            code: EINVAL,
        })
    }
}

// =============================================================================
// I/O Statistics
// =============================================================================

/// I/O statistics for a metadata file.
#[derive(Debug, Default)]
pub struct MetaIoStats {
    /// Completed read operations
    pub reads: AtomicU64,

    /// Completed write operations
    pub writes: AtomicU64,

    /// Bytes read
    pub bytes_read: AtomicU64,

    /// Bytes written
    pub bytes_written: AtomicU64,

    /// Failed operations
    pub errors: AtomicU64,

    /// Asynchronous requests accepted
    pub async_issued: AtomicU64,

    /// Asynchronous requests whose callback has fired
    pub async_completed: AtomicU64,

    /// Asynchronous requests flagged top priority
    pub top_priority_issued: AtomicU64,
}

/// Point-in-time copy of [`MetaIoStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetaIoStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub errors: u64,
    pub async_issued: u64,
    pub async_completed: u64,
    pub top_priority_issued: u64,
}

impl MetaIoStats {
    /// Create new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished operation.
    pub fn record(&self, opcode: MetaFsIoOpcode, bytes: u64, success: bool) {
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match opcode {
            MetaFsIoOpcode::Read => {
                self.reads.fetch_add(1, Ordering::Relaxed);
                self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
            }
            MetaFsIoOpcode::Write => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    /// Record an accepted asynchronous submission.
    pub fn record_submit(&self, top_priority: bool) {
        self.async_issued.fetch_add(1, Ordering::Relaxed);
        if top_priority {
            self.top_priority_issued.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a fired asynchronous completion.
    pub fn record_complete(&self) {
        self.async_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Asynchronous requests accepted but not yet completed.
    pub fn in_flight(&self) -> u64 {
        let issued = self.async_issued.load(Ordering::Acquire);
        let completed = self.async_completed.load(Ordering::Acquire);
        issued.saturating_sub(completed)
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> MetaIoStatsSnapshot {
        MetaIoStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            async_issued: self.async_issued.load(Ordering::Relaxed),
            async_completed: self.async_completed.load(Ordering::Relaxed),
            top_priority_issued: self.top_priority_issued.load(Ordering::Relaxed),
        }
    }
}
