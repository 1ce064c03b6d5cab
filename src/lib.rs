//! Reverse Map - Physical-to-Logical Block Ownership for Log-Structured Arrays
//!
//! Data lands in fixed-size stripes. For every physical block of a stripe the
//! reverse map records which volume and logical block address produced it.
//! Garbage collection consults it to find live data; crash recovery reads it
//! back to rebuild the forward map.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ReverseMapManager                        │
//! │   geometry │ pooled packs (one per wb stripe) │ bulk I/O     │
//! └───────────────┬───────────────────────────────┬──────────────┘
//!                 │ ReverseMapPack                │
//!                 │ async flush/load per VSID     │
//!                 ▼                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │          MetaFileIntf: FileStore │ MockFileIntf              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`] - Array configuration
//! - [`error`] - Error types
//! - [`mapper`] - Address types, collaborator ports and the reverse map
//! - [`meta_file`] - Metadata file stores and async I/O contexts

pub mod config;
pub mod error;
pub mod mapper;
pub mod meta_file;

// Re-export commonly used types
pub use config::{ArrayConfig, StoreBackend};
pub use error::{Error, Result};
pub use mapper::reversemap::{
    RevMapEntry, RevMapGeometry, RevMapPageHeader, ReverseMapManager, ReverseMapPack,
    REVMAP_WHOLE_FILE_NAME,
};
pub use mapper::{MapperAddressInfo, StripeId, VolumeService, UNMAP_STRIPE};
pub use meta_file::{AsyncMetaFileIoCtx, MetaFileIntf, MetaFsIoOpcode};
