//! Mapper
//!
//! Address-space types, the collaborator ports the reverse map consults,
//! and the reverse map itself.

pub mod address;
pub mod ports;
pub mod reversemap;

pub use address::{
    BlkAddr, BlkOffset, MapperAddressInfo, StripeAddr, StripeId, StripeLoc, VirtualBlkAddr,
    VolumeId, INVALID_RBA, INVALID_VOLUME, UNMAP_STRIPE,
};
pub use ports::{
    InMemoryStripeMap, InMemoryVolumeManager, InMemoryVsaMap, StripeMap, VolumeManager,
    VolumeService, VsaMap,
};
pub use reversemap::{ReverseMapManager, ReverseMapPack, RevMapEntry, RevMapGeometry, RevMapPageHeader};
