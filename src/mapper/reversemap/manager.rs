//! Reverse map manager
//!
//! Owns the whole-array reverse map file and a fixed pool of packs, one per
//! write-buffer stripe slot.
//!
//! ```text
//!  RevMapWhole   ┌──────────┬──────────┬──────────┬─────┬──────────────┐
//!                │ vsid 0   │ vsid 1   │ vsid 2   │ ... │ vsid max-1   │
//!                └──────────┴──────────┴──────────┴─────┴──────────────┘
//!                  ▲ each region is file_size_per_stripe bytes
//!                  │
//!  pool          [pack wb0] [pack wb1] ... [pack wbN-1]    (init..dispose)
//!  GC            alloc_reverse_map_pack(true) -> caller-owned pack
//! ```
//!
//! `init` and `dispose` must be serialized by the caller. Everything else
//! takes `&self`.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::layout::RevMapGeometry;
use super::pack::ReverseMapPack;
use crate::error::{Error, Result};
use crate::mapper::address::{MapperAddressInfo, StripeId, UNMAP_STRIPE};
use crate::mapper::ports::{StripeMap, VolumeManager, VolumeService, VsaMap};
use crate::meta_file::{open_store, MetaFileIntf};

/// Name of the whole-array reverse map file.
pub const REVMAP_WHOLE_FILE_NAME: &str = "RevMapWhole";

/// Reverse map manager for one array.
pub struct ReverseMapManager {
    addr_info: MapperAddressInfo,
    vsa_map: Arc<dyn VsaMap>,
    stripe_map: Arc<dyn StripeMap>,
    volume_manager: Option<Arc<dyn VolumeManager>>,

    /// Fixed once derived
    geometry: Option<RevMapGeometry>,
    file_size_whole: u64,

    file: Option<Arc<dyn MetaFileIntf>>,
    packs: Vec<ReverseMapPack>,
}

impl ReverseMapManager {
    /// Create an uninitialized manager.
    ///
    /// Without a `volume_manager`, `init` looks one up in
    /// [`VolumeService::global`] by array name.
    pub fn new(
        addr_info: MapperAddressInfo,
        vsa_map: Arc<dyn VsaMap>,
        stripe_map: Arc<dyn StripeMap>,
        volume_manager: Option<Arc<dyn VolumeManager>>,
    ) -> Self {
        Self {
            addr_info,
            vsa_map,
            stripe_map,
            volume_manager,
            geometry: None,
            file_size_whole: 0,
            file: None,
            packs: Vec::new(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initialize against the store selected by the array configuration.
    pub fn init(&mut self) -> Result<()> {
        let file = open_store(self.addr_info.config(), REVMAP_WHOLE_FILE_NAME);
        self.init_with_file(file)
    }

    /// Initialize against an explicit whole-array file.
    ///
    /// Creates the file if it does not exist, opens it, and builds one pack
    /// per write-buffer stripe. Must be called once before anything else.
    #[instrument(skip(self, file), fields(array = %self.addr_info.array_name()))]
    pub fn init_with_file(&mut self, file: Arc<dyn MetaFileIntf>) -> Result<()> {
        self.addr_info.config().validate()?;
        let array_name = self.addr_info.array_name().to_string();

        let volume_manager = match &self.volume_manager {
            Some(vm) => Arc::clone(vm),
            None => VolumeService::global()
                .get_volume_manager(&array_name)
                .ok_or_else(|| Error::VolumeManagerUnavailable(array_name.clone()))?,
        };
        self.volume_manager = Some(Arc::clone(&volume_manager));

        let geometry = RevMapGeometry::new(self.addr_info.mpage_size(), self.addr_info.blks_per_stripe())?;
        info!(
            mpage_size = geometry.mpage_size(),
            entries_per_normal_page = geometry.entries_per_normal_page(),
            entries_per_first_page = geometry.entries_per_first_page(),
            num_mpages_per_stripe = geometry.num_mpages_per_stripe(),
            file_size_per_stripe = geometry.file_size_per_stripe(),
            "Derived reverse map geometry"
        );

        let file_size_whole = geometry.whole_file_size(self.addr_info.max_vsid());
        if !file.does_file_exist() {
            if let Err(e) = file.create(file_size_whole) {
                error!(file = file.file_name(), size = file_size_whole, error = %e, "Failed to create whole reverse map file");
                return Err(e);
            }
            info!(file = file.file_name(), size = file_size_whole, "Created whole reverse map file");
        } else if file.file_size() != file_size_whole {
            return Err(Error::GeometryMismatch {
                field: "whole_file_size",
                cached: file_size_whole,
                observed: file.file_size(),
            });
        }

        if !file.is_opened() {
            file.open()?;
        }

        let packs = (0..self.addr_info.num_wb_stripes())
            .map(|wb_lsid| {
                let mut pack = ReverseMapPack::new(geometry, Arc::clone(&file), &array_name);
                pack.associate(
                    Arc::clone(&volume_manager),
                    wb_lsid,
                    Arc::clone(&self.vsa_map),
                    Arc::clone(&self.stripe_map),
                );
                pack
            })
            .collect();

        self.geometry = Some(geometry);
        self.file_size_whole = file_size_whole;
        self.file = Some(file);
        self.packs = packs;
        Ok(())
    }

    /// Close the file and release the pool. Safe to call repeatedly.
    #[instrument(skip(self), fields(array = %self.addr_info.array_name()))]
    pub fn dispose(&mut self) {
        if let Some(file) = self.file.take() {
            if file.is_opened() {
                if let Err(e) = file.close() {
                    warn!(file = file.file_name(), error = %e, "Failed to close whole reverse map file");
                }
            }
        }
        self.packs.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.file.is_some()
    }

    // =========================================================================
    // Packs
    // =========================================================================

    /// Pooled pack for write-buffer stripe `wb_lsid`.
    ///
    /// # Panics
    ///
    /// If `wb_lsid >= num_wb_stripes` or the manager is not initialized.
    pub fn get_reverse_map_pack(&self, wb_lsid: StripeId) -> &ReverseMapPack {
        &self.packs[wb_lsid as usize]
    }

    pub fn num_packs(&self) -> usize {
        self.packs.len()
    }

    /// New pack over the shared file, owned by the caller.
    ///
    /// GC destinations are bound to [`UNMAP_STRIPE`] and the address
    /// translation services; other packs are left unassociated.
    pub fn alloc_reverse_map_pack(&self, gc_dest: bool) -> Result<ReverseMapPack> {
        let (geometry, file) = match (self.geometry, &self.file) {
            (Some(geometry), Some(file)) => (geometry, Arc::clone(file)),
            _ => return Err(Error::NotInitialized),
        };

        let mut pack = ReverseMapPack::new(geometry, file, self.addr_info.array_name());
        if gc_dest {
            let volume_manager = self.volume_manager.clone().ok_or(Error::NotInitialized)?;
            pack.associate(
                volume_manager,
                UNMAP_STRIPE,
                Arc::clone(&self.vsa_map),
                Arc::clone(&self.stripe_map),
            );
        }
        Ok(pack)
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    pub fn geometry(&self) -> Option<&RevMapGeometry> {
        self.geometry.as_ref()
    }

    /// Bytes per stripe region, 0 before init.
    pub fn get_reverse_map_per_stripe_file_size(&self) -> u64 {
        self.geometry.map_or(0, |g| g.file_size_per_stripe())
    }

    /// Bytes in the whole-array file, 0 before init.
    pub fn get_whole_reverse_map_file_size(&self) -> u64 {
        self.file_size_whole
    }

    /// Fail if configuration read now disagrees with the geometry from init.
    pub fn check_geometry(&self, mpage_size: u32, blks_per_stripe: u32) -> Result<()> {
        self.geometry
            .as_ref()
            .ok_or(Error::NotInitialized)?
            .ensure_matches(mpage_size, blks_per_stripe)
    }

    // =========================================================================
    // Whole-Array I/O
    // =========================================================================

    fn whole_file(&self) -> Result<&Arc<dyn MetaFileIntf>> {
        self.file.as_ref().ok_or(Error::NotInitialized)
    }

    fn check_buffer(&self, len: usize) -> Result<usize> {
        if (len as u64) < self.file_size_whole {
            return Err(Error::BufferTooSmall {
                required: self.file_size_whole,
                actual: len as u64,
            });
        }
        Ok(self.file_size_whole as usize)
    }

    /// Read the whole-array file into `buffer`. Store errors are returned
    /// as reported.
    #[instrument(skip(self, buffer), fields(array = %self.addr_info.array_name(), len = buffer.len()))]
    pub fn load_whole_reverse_map(&self, buffer: &mut [u8]) -> Result<()> {
        let file = self.whole_file()?;
        let size = self.check_buffer(buffer.len())?;
        file.read(0, &mut buffer[..size])
    }

    /// Write `buffer` over the whole-array file. Store errors are returned
    /// as reported.
    #[instrument(skip(self, buffer), fields(array = %self.addr_info.array_name(), len = buffer.len()))]
    pub fn store_whole_reverse_map(&self, buffer: &[u8]) -> Result<()> {
        let file = self.whole_file()?;
        let size = self.check_buffer(buffer.len())?;
        file.write(0, &buffer[..size])
    }

    /// Wait for every pooled pack's outstanding I/O to complete.
    pub async fn wait_all_pending_io_done(&self) -> Result<()> {
        info!(
            array = self.addr_info.array_name(),
            packs = self.packs.len(),
            "Waiting for pending reverse map I/O"
        );
        for pack in &self.packs {
            pack.wait_pending_io_done().await?;
        }
        Ok(())
    }
}

impl Drop for ReverseMapManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
