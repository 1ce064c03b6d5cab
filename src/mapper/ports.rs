//! Collaborator Ports
//!
//! The reverse map reads, but never mutates, three services owned by the
//! rest of the mapper:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    ReverseMapPack                        │
//! └────────┬──────────────────┬───────────────────┬──────────┘
//!          ▼                  ▼                   ▼
//!     VolumeManager        VsaMap             StripeMap
//!   (volume identity)  (LBA -> VSA)      (VSID -> LSA)
//! ```
//!
//! In-memory implementations are provided for tests and tooling.
//! [`VolumeService`] resolves a volume manager by array name for callers
//! that were not handed one explicitly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::address::{BlkAddr, StripeAddr, StripeId, VirtualBlkAddr, VolumeId};

// =============================================================================
// Ports
// =============================================================================

/// Forward (logical-to-physical) map lookups.
pub trait VsaMap: Send + Sync {
    /// Current virtual address of `(volume_id, rba)`, or
    /// [`VirtualBlkAddr::UNMAPPED`].
    fn get_vsa(&self, volume_id: VolumeId, rba: BlkAddr) -> VirtualBlkAddr;
}

/// Stripe map lookups.
pub trait StripeMap: Send + Sync {
    /// Logical location of virtual stripe `vsid`.
    fn get_lsa(&self, vsid: StripeId) -> StripeAddr;
}

/// Volume identity checks.
pub trait VolumeManager: Send + Sync {
    /// Whether `volume_id` names a live volume.
    fn volume_exists(&self, volume_id: VolumeId) -> bool;
}

// =============================================================================
// Volume Service
// =============================================================================

/// Registry of volume managers keyed by array name.
#[derive(Default)]
pub struct VolumeService {
    managers: RwLock<HashMap<String, Arc<dyn VolumeManager>>>,
}

static VOLUME_SERVICE: Lazy<VolumeService> = Lazy::new(VolumeService::default);

impl VolumeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static VolumeService {
        &VOLUME_SERVICE
    }

    pub fn register(&self, array_name: &str, manager: Arc<dyn VolumeManager>) {
        self.managers.write().insert(array_name.to_string(), manager);
    }

    pub fn unregister(&self, array_name: &str) -> Option<Arc<dyn VolumeManager>> {
        self.managers.write().remove(array_name)
    }

    pub fn get_volume_manager(&self, array_name: &str) -> Option<Arc<dyn VolumeManager>> {
        self.managers.read().get(array_name).cloned()
    }
}

// =============================================================================
// In-Memory Implementations
// =============================================================================

/// Forward map backed by a hash map.
#[derive(Debug, Default)]
pub struct InMemoryVsaMap {
    entries: RwLock<HashMap<(VolumeId, BlkAddr), VirtualBlkAddr>>,
}

impl InMemoryVsaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_vsa(&self, volume_id: VolumeId, rba: BlkAddr, vsa: VirtualBlkAddr) {
        self.entries.write().insert((volume_id, rba), vsa);
    }

    pub fn unmap(&self, volume_id: VolumeId, rba: BlkAddr) {
        self.entries.write().remove(&(volume_id, rba));
    }
}

impl VsaMap for InMemoryVsaMap {
    fn get_vsa(&self, volume_id: VolumeId, rba: BlkAddr) -> VirtualBlkAddr {
        self.entries
            .read()
            .get(&(volume_id, rba))
            .copied()
            .unwrap_or(VirtualBlkAddr::UNMAPPED)
    }
}

/// Stripe map backed by a hash map; unknown stripes resolve to the user area.
#[derive(Debug, Default)]
pub struct InMemoryStripeMap {
    entries: RwLock<HashMap<StripeId, StripeAddr>>,
}

impl InMemoryStripeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lsa(&self, vsid: StripeId, lsa: StripeAddr) {
        self.entries.write().insert(vsid, lsa);
    }
}

impl StripeMap for InMemoryStripeMap {
    fn get_lsa(&self, vsid: StripeId) -> StripeAddr {
        self.entries
            .read()
            .get(&vsid)
            .copied()
            .unwrap_or(StripeAddr::in_user_area(vsid))
    }
}

/// Volume manager backed by a set of live volume ids.
#[derive(Debug, Default)]
pub struct InMemoryVolumeManager {
    volumes: RwLock<HashSet<VolumeId>>,
}

impl InMemoryVolumeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volumes(ids: impl IntoIterator<Item = VolumeId>) -> Self {
        Self {
            volumes: RwLock::new(ids.into_iter().collect()),
        }
    }

    pub fn add_volume(&self, volume_id: VolumeId) {
        self.volumes.write().insert(volume_id);
    }

    pub fn remove_volume(&self, volume_id: VolumeId) {
        self.volumes.write().remove(&volume_id);
    }
}

impl VolumeManager for InMemoryVolumeManager {
    fn volume_exists(&self, volume_id: VolumeId) -> bool {
        self.volumes.read().contains(&volume_id)
    }
}
