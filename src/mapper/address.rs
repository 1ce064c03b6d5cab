//! Address-space types shared by the mapper
//!
//! Two stripe namespaces exist side by side:
//!
//! - **VSID**: a stripe's position in the array-wide virtual address
//!   space, `[0, max_vsid)`. Indexes the whole-array reverse map file.
//! - **wbLsid**: a slot in the bounded write-buffer pool,
//!   `[0, num_wb_stripes)`. Indexes the pooled reverse map packs.

use serde::{Deserialize, Serialize};

use crate::config::ArrayConfig;

/// Stripe identifier (VSID or wbLsid depending on context).
pub type StripeId = u32;

/// Logical block address within a volume.
pub type BlkAddr = u64;

/// Block offset within a stripe.
pub type BlkOffset = u64;

/// Volume identifier.
pub type VolumeId = u32;

/// "No write-buffer association" marker.
pub const UNMAP_STRIPE: StripeId = u32::MAX;

/// Unmapped logical block.
pub const INVALID_RBA: BlkAddr = u64::MAX;

/// Unmapped volume.
pub const INVALID_VOLUME: VolumeId = u32::MAX;

/// Virtual block address: (VSID, offset within stripe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualBlkAddr {
    pub stripe_id: StripeId,
    pub offset: BlkOffset,
}

impl VirtualBlkAddr {
    pub const UNMAPPED: VirtualBlkAddr = VirtualBlkAddr {
        stripe_id: UNMAP_STRIPE,
        offset: u64::MAX,
    };

    pub fn new(stripe_id: StripeId, offset: BlkOffset) -> Self {
        Self { stripe_id, offset }
    }

    pub fn is_unmapped(&self) -> bool {
        self.stripe_id == UNMAP_STRIPE
    }
}

/// Where a stripe's data currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StripeLoc {
    /// Still in a write-buffer slot
    WriteBuffer,
    /// Flushed to the user data area
    UserArea,
}

/// Logical stripe address as tracked by the stripe map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StripeAddr {
    pub loc: StripeLoc,
    pub stripe_id: StripeId,
}

impl StripeAddr {
    pub fn in_write_buffer(stripe_id: StripeId) -> Self {
        Self {
            loc: StripeLoc::WriteBuffer,
            stripe_id,
        }
    }

    pub fn in_user_area(stripe_id: StripeId) -> Self {
        Self {
            loc: StripeLoc::UserArea,
            stripe_id,
        }
    }
}

/// Array constants the mapper reads, fixed for the array's lifetime.
#[derive(Debug, Clone)]
pub struct MapperAddressInfo {
    config: ArrayConfig,
}

impl MapperAddressInfo {
    pub fn new(config: ArrayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    pub fn array_name(&self) -> &str {
        &self.config.array_name
    }

    pub fn array_id(&self) -> u32 {
        self.config.array_id
    }

    pub fn mpage_size(&self) -> u32 {
        self.config.mpage_size
    }

    pub fn blks_per_stripe(&self) -> u32 {
        self.config.blks_per_stripe
    }

    pub fn max_vsid(&self) -> u32 {
        self.config.max_vsid
    }

    pub fn num_wb_stripes(&self) -> u32 {
        self.config.num_wb_stripes
    }

    pub fn is_ut(&self) -> bool {
        self.config.is_ut()
    }
}
