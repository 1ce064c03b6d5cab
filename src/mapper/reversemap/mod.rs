//! Reverse Map
//!
//! Per-stripe tables recording, for every physical block offset, the volume
//! and logical block that produced it. Garbage collection reads them to find
//! live data; crash recovery reads them to rebuild the forward map.
//!
//! # Components
//!
//! - [`layout`] - Page geometry and the bit-exact entry/header codec
//! - [`pack`] - One stripe's in-memory reverse map and its async I/O
//! - [`manager`] - Pooled packs and the whole-array reverse map file

pub mod layout;
pub mod manager;
pub mod pack;

pub use layout::{
    RevMapEntry, RevMapGeometry, RevMapPageHeader, REVMAP_ENTRIES_PER_SECTOR, REVMAP_ENTRY_SIZE,
    REVMAP_PAGE_MAGIC, REVMAP_SECTOR_SIZE,
};
pub use manager::{ReverseMapManager, REVMAP_WHOLE_FILE_NAME};
pub use pack::ReverseMapPack;
