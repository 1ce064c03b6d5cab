//! Reverse map pack
//!
//! A pack is the in-memory image of one stripe's reverse map: exactly
//! `file_size_per_stripe` bytes laid out as described in [`super::layout`].
//! Packs share the whole-array file with the manager and read or write only
//! their own VSID-indexed region of it.
//!
//! Asynchronous I/O is counted per pack. The counter is raised before a
//! request is submitted and lowered after the caller's callback has run, so
//! [`ReverseMapPack::wait_pending_io_done`] never returns while a callback is
//! still executing.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::layout::{RevMapEntry, RevMapGeometry, RevMapPageHeader, REVMAP_ENTRY_SIZE, REVMAP_FILL_BYTE};
use crate::error::{Error, Result};
use crate::mapper::address::{
    BlkAddr, BlkOffset, StripeAddr, StripeId, VirtualBlkAddr, VolumeId, UNMAP_STRIPE,
};
use crate::mapper::ports::{StripeMap, VolumeManager, VsaMap};
use crate::meta_file::{AsyncMetaFileIoCtx, MetaFileIntf, MetaFsIoOpcode};

/// Logical identity of an associated pack.
struct PackBinding {
    volume_manager: Arc<dyn VolumeManager>,
    wb_lsid: StripeId,
    vsa_map: Arc<dyn VsaMap>,
    stripe_map: Arc<dyn StripeMap>,
}

struct PackPages {
    vsid: Option<StripeId>,
    buf: Vec<u8>,
    /// Bumped on every link/unlink; reads issued under an older value are
    /// not adopted.
    generation: u64,
}

/// State reachable from completion callbacks.
struct PackShared {
    pages: Mutex<PackPages>,
    pending: watch::Sender<u32>,
}

impl PackShared {
    fn io_started(&self) {
        self.pending.send_modify(|n| *n += 1);
    }

    fn io_finished(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Lowers the pending counter when dropped, including during unwinding.
struct PendingIoGuard(Arc<PackShared>);

impl Drop for PendingIoGuard {
    fn drop(&mut self) {
        self.0.io_finished();
    }
}

/// One stripe's reverse map buffer.
pub struct ReverseMapPack {
    geometry: RevMapGeometry,
    file: Arc<dyn MetaFileIntf>,
    array_name: String,
    binding: Option<PackBinding>,
    shared: Arc<PackShared>,
}

impl ReverseMapPack {
    /// Create an unlinked, unassociated pack over `file`.
    pub fn new(geometry: RevMapGeometry, file: Arc<dyn MetaFileIntf>, array_name: &str) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            geometry,
            file,
            array_name: array_name.to_string(),
            binding: None,
            shared: Arc::new(PackShared {
                pages: Mutex::new(PackPages {
                    vsid: None,
                    buf: vec![REVMAP_FILL_BYTE; geometry.file_size_per_stripe() as usize],
                    generation: 0,
                }),
                pending,
            }),
        }
    }

    /// Bind the pack to a write-buffer slot and the address-translation
    /// services. GC destinations pass [`UNMAP_STRIPE`] as `wb_lsid`.
    pub fn associate(
        &mut self,
        volume_manager: Arc<dyn VolumeManager>,
        wb_lsid: StripeId,
        vsa_map: Arc<dyn VsaMap>,
        stripe_map: Arc<dyn StripeMap>,
    ) {
        self.binding = Some(PackBinding {
            volume_manager,
            wb_lsid,
            vsa_map,
            stripe_map,
        });
    }

    pub fn geometry(&self) -> &RevMapGeometry {
        &self.geometry
    }

    pub fn array_name(&self) -> &str {
        &self.array_name
    }

    /// Write-buffer slot, `None` when unassociated.
    pub fn wb_lsid(&self) -> Option<StripeId> {
        self.binding.as_ref().map(|b| b.wb_lsid)
    }

    pub fn is_associated(&self) -> bool {
        self.binding.is_some()
    }

    pub fn is_gc_destination(&self) -> bool {
        self.wb_lsid() == Some(UNMAP_STRIPE)
    }

    /// Number of stripe regions the shared file holds.
    pub fn max_vsid(&self) -> u32 {
        (self.file.file_size() / self.geometry.file_size_per_stripe()) as u32
    }

    fn check_vsid(&self, vsid: StripeId) -> Result<()> {
        let limit = self.max_vsid();
        if vsid >= limit {
            return Err(Error::OutOfRange {
                what: "vsid",
                index: vsid as u64,
                limit: limit as u64,
            });
        }
        Ok(())
    }

    fn check_offset(&self, offset: BlkOffset) -> Result<()> {
        let limit = self.geometry.blks_per_stripe() as u64;
        if offset >= limit {
            return Err(Error::OutOfRange {
                what: "block offset",
                index: offset,
                limit,
            });
        }
        Ok(())
    }

    fn header_for(&self, vsid: StripeId) -> RevMapPageHeader {
        RevMapPageHeader {
            vsid,
            wb_lsid: self.wb_lsid().unwrap_or(UNMAP_STRIPE),
            num_blks: self.geometry.blks_per_stripe(),
        }
    }

    // =========================================================================
    // Stripe Linkage
    // =========================================================================

    /// Start tracking stripe `vsid`: every entry becomes unmapped and the
    /// header is restamped.
    pub fn link_vsid(&self, vsid: StripeId) -> Result<()> {
        self.check_vsid(vsid)?;
        let header = self.header_for(vsid);

        let mut pages = self.shared.pages.lock();
        pages.buf.fill(REVMAP_FILL_BYTE);
        header.encode(&mut pages.buf);
        pages.vsid = Some(vsid);
        pages.generation += 1;
        Ok(())
    }

    pub fn unlink_vsid(&self) {
        let mut pages = self.shared.pages.lock();
        pages.vsid = None;
        pages.generation += 1;
    }

    pub fn linked_vsid(&self) -> Option<StripeId> {
        self.shared.pages.lock().vsid
    }

    /// Decoded page-0 header, `None` if it was never stamped.
    pub fn header(&self) -> Option<RevMapPageHeader> {
        RevMapPageHeader::decode(&self.shared.pages.lock().buf)
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Record that block `offset` of the linked stripe holds `(volume_id, rba)`.
    pub fn set_entry(&self, offset: BlkOffset, rba: BlkAddr, volume_id: VolumeId) -> Result<()> {
        self.check_offset(offset)?;
        let at = self.geometry.entry_offset(offset);

        let mut pages = self.shared.pages.lock();
        if pages.vsid.is_none() {
            return Err(Error::VsidNotLinked);
        }
        RevMapEntry::new(rba, volume_id).encode(&mut pages.buf[at..at + REVMAP_ENTRY_SIZE as usize]);
        Ok(())
    }

    pub fn get_entry(&self, offset: BlkOffset) -> Result<RevMapEntry> {
        self.check_offset(offset)?;
        let at = self.geometry.entry_offset(offset);

        let pages = self.shared.pages.lock();
        if pages.vsid.is_none() {
            return Err(Error::VsidNotLinked);
        }
        Ok(RevMapEntry::decode(&pages.buf[at..]))
    }

    /// Every mapped `(offset, entry)` of the linked stripe, in offset order.
    pub fn mapped_entries(&self) -> Result<Vec<(BlkOffset, RevMapEntry)>> {
        let pages = self.shared.pages.lock();
        if pages.vsid.is_none() {
            return Err(Error::VsidNotLinked);
        }
        let entries = (0..self.geometry.blks_per_stripe() as u64)
            .map(|off| (off, RevMapEntry::decode(&pages.buf[self.geometry.entry_offset(off)..])))
            .filter(|(_, entry)| !entry.is_unmapped())
            .collect();
        Ok(entries)
    }

    // =========================================================================
    // Address Translation
    // =========================================================================

    /// Whether block `offset` still holds live data.
    ///
    /// The owning volume must exist and the forward map must still point the
    /// entry's `(volume, rba)` at this stripe and offset.
    pub fn is_block_valid(&self, offset: BlkOffset) -> Result<bool> {
        let binding = self.binding.as_ref().ok_or(Error::PackNotAssociated)?;
        let vsid = self.linked_vsid().ok_or(Error::VsidNotLinked)?;
        let entry = self.get_entry(offset)?;

        if entry.is_unmapped() || !binding.volume_manager.volume_exists(entry.volume_id) {
            return Ok(false);
        }
        let vsa = binding.vsa_map.get_vsa(entry.volume_id, entry.rba);
        Ok(vsa == VirtualBlkAddr::new(vsid, offset))
    }

    /// Stripe-map location of the linked stripe.
    pub fn linked_stripe_addr(&self) -> Result<StripeAddr> {
        let binding = self.binding.as_ref().ok_or(Error::PackNotAssociated)?;
        let vsid = self.linked_vsid().ok_or(Error::VsidNotLinked)?;
        Ok(binding.stripe_map.get_lsa(vsid))
    }

    // =========================================================================
    // Asynchronous I/O
    // =========================================================================

    /// Write the pack to its stripe's region.
    ///
    /// The current pages are snapshotted into the request, so the pack stays
    /// usable while the write is in flight. Errors are reported only through
    /// `callback`; `Err` here means nothing was submitted.
    pub fn flush<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&AsyncMetaFileIoCtx) + Send + 'static,
    {
        let (vsid, snapshot) = {
            let pages = self.shared.pages.lock();
            let vsid = pages.vsid.ok_or(Error::VsidNotLinked)?;
            (vsid, pages.buf.clone())
        };
        let ctx = AsyncMetaFileIoCtx::new(
            MetaFsIoOpcode::Write,
            self.open_fd()?,
            self.geometry.region_offset(vsid),
            snapshot,
        )
        .with_vsid(vsid);
        self.issue(ctx, callback)
    }

    /// Read stripe `vsid`'s region into the pack.
    ///
    /// On success the pack is linked to `vsid` before `callback` runs. A
    /// region without a header was never flushed and loads as all unmapped.
    /// If the pack is linked or unlinked while the read is in flight, the
    /// data read is discarded and the pack keeps its newer contents.
    pub fn load<F>(&self, vsid: StripeId, callback: F) -> Result<()>
    where
        F: FnOnce(&AsyncMetaFileIoCtx) + Send + 'static,
    {
        let ctx = self.read_ctx(vsid)?;
        self.issue(ctx, callback)
    }

    /// [`load`](Self::load) ahead of steady-state traffic. Used by recovery.
    pub fn load_top_priority<F>(&self, vsid: StripeId, callback: F) -> Result<()>
    where
        F: FnOnce(&AsyncMetaFileIoCtx) + Send + 'static,
    {
        let mut ctx = self.read_ctx(vsid)?;
        ctx.set_top_priority();
        self.issue(ctx, callback)
    }

    fn read_ctx(&self, vsid: StripeId) -> Result<AsyncMetaFileIoCtx> {
        self.check_vsid(vsid)?;
        let buffer = vec![0u8; self.geometry.file_size_per_stripe() as usize];
        Ok(AsyncMetaFileIoCtx::new(
            MetaFsIoOpcode::Read,
            self.open_fd()?,
            self.geometry.region_offset(vsid),
            buffer,
        )
        .with_vsid(vsid))
    }

    fn open_fd(&self) -> Result<i32> {
        self.file
            .fd()
            .ok_or_else(|| Error::MetaFileNotOpen(self.file.file_name().to_string()))
    }

    fn issue<F>(&self, ctx: AsyncMetaFileIoCtx, callback: F) -> Result<()>
    where
        F: FnOnce(&AsyncMetaFileIoCtx) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let fresh_header = ctx.vsid.map(|vsid| self.header_for(vsid));
        let issued_generation = self.shared.pages.lock().generation;

        let ctx = ctx.with_callback(move |done| {
            let guard = PendingIoGuard(shared);
            if done.opcode == MetaFsIoOpcode::Read && done.is_success() {
                let mut pages = guard.0.pages.lock();
                // A link or unlink issued after this read wins.
                if pages.generation == issued_generation {
                    if RevMapPageHeader::decode(&done.buffer).is_some() {
                        pages.buf.copy_from_slice(&done.buffer);
                    } else {
                        pages.buf.fill(REVMAP_FILL_BYTE);
                        if let Some(header) = fresh_header {
                            header.encode(&mut pages.buf);
                        }
                    }
                    pages.vsid = done.vsid;
                }
            }
            callback(&done);
        });

        self.shared.io_started();
        if let Err(e) = self.file.submit_io(ctx) {
            self.shared.io_finished();
            return Err(e);
        }
        Ok(())
    }

    /// Requests submitted whose callback has not yet returned.
    pub fn pending_io_count(&self) -> u32 {
        *self.shared.pending.borrow()
    }

    /// Wait until every submitted request has completed. Cancels nothing.
    pub async fn wait_pending_io_done(&self) -> Result<()> {
        let mut rx = self.shared.pending.subscribe();
        let drained = rx.wait_for(|n| *n == 0).await.map(|_| ());
        drained.map_err(|e| Error::Internal(format!("pending I/O counter closed: {}", e)))
    }
}

impl fmt::Debug for ReverseMapPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseMapPack")
            .field("array_name", &self.array_name)
            .field("wb_lsid", &self.wb_lsid())
            .field("vsid", &self.linked_vsid())
            .field("pending_io", &self.pending_io_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::address::StripeLoc;
    use crate::mapper::ports::{InMemoryStripeMap, InMemoryVolumeManager, InMemoryVsaMap};
    use crate::mapper::reversemap::layout::REVMAP_PAGE_MAGIC;
    use crate::meta_file::{CompletionMode, MockFileIntf};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
    use std::time::Duration;

    const MAX_VSID: u32 = 16;

    fn setup(mode: CompletionMode) -> (Arc<MockFileIntf>, ReverseMapPack) {
        let geometry = RevMapGeometry::new(4096, 300).unwrap();
        let file = Arc::new(MockFileIntf::with_mode("RevMapWhole", 0, mode));
        file.create(geometry.whole_file_size(MAX_VSID)).unwrap();
        file.open().unwrap();
        let pack = ReverseMapPack::new(geometry, file.clone(), "A0");
        (file, pack)
    }

    fn counting_callback(
        counter: &Arc<AtomicU32>,
    ) -> impl FnOnce(&AsyncMetaFileIoCtx) + Send + 'static {
        let counter = Arc::clone(counter);
        move |ctx| {
            assert!(ctx.is_success());
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_new_pack_is_unlinked() {
        let (_file, pack) = setup(CompletionMode::Inline);
        assert_eq!(pack.linked_vsid(), None);
        assert_eq!(pack.wb_lsid(), None);
        assert!(!pack.is_associated());
        assert!(!pack.is_gc_destination());
        assert_eq!(pack.max_vsid(), MAX_VSID);
        assert_matches!(pack.get_entry(0), Err(Error::VsidNotLinked));
    }

    #[test]
    fn test_link_resets_entries_and_stamps_header() {
        let (_file, pack) = setup(CompletionMode::Inline);
        pack.link_vsid(3).unwrap();
        pack.set_entry(5, 100, 1).unwrap();

        pack.link_vsid(4).unwrap();
        assert!(pack.get_entry(5).unwrap().is_unmapped());
        assert_eq!(
            pack.header(),
            Some(RevMapPageHeader {
                vsid: 4,
                wb_lsid: UNMAP_STRIPE,
                num_blks: 300,
            })
        );
    }

    #[test]
    fn test_link_rejects_vsid_past_file() {
        let (_file, pack) = setup(CompletionMode::Inline);
        assert_matches!(
            pack.link_vsid(MAX_VSID),
            Err(Error::OutOfRange { what: "vsid", limit: 16, .. })
        );
    }

    #[test]
    fn test_entries_span_pages() {
        let (_file, pack) = setup(CompletionMode::Inline);
        pack.link_vsid(0).unwrap();
        pack.set_entry(0, 10, 1).unwrap();
        pack.set_entry(223, 11, 1).unwrap();
        pack.set_entry(224, 12, 2).unwrap();
        pack.set_entry(299, 13, 2).unwrap();

        assert_eq!(pack.get_entry(224).unwrap(), RevMapEntry::new(12, 2));
        let mapped: Vec<_> = pack.mapped_entries().unwrap().into_iter().map(|(o, _)| o).collect();
        assert_eq!(mapped, vec![0, 223, 224, 299]);

        assert_matches!(
            pack.set_entry(300, 1, 1),
            Err(Error::OutOfRange { what: "block offset", .. })
        );
    }

    #[test]
    fn test_flush_writes_own_region() {
        let (file, pack) = setup(CompletionMode::Inline);
        let done = Arc::new(AtomicU32::new(0));

        pack.link_vsid(2).unwrap();
        pack.set_entry(0, 0xABCD, 7).unwrap();
        pack.flush(counting_callback(&done)).unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pack.pending_io_count(), 0);

        let region = pack.geometry().region_offset(2) as usize;
        let data = file.snapshot().unwrap();
        assert_eq!(&data[region..region + 4], &REVMAP_PAGE_MAGIC.to_le_bytes());
        assert_eq!(&data[region + 512..region + 520], &0xABCDu64.to_le_bytes());
        // Neighbouring regions untouched.
        assert!(data[..region].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_flush_requires_link() {
        let (_file, pack) = setup(CompletionMode::Inline);
        assert_matches!(pack.flush(|_| {}), Err(Error::VsidNotLinked));
        assert_eq!(pack.pending_io_count(), 0);
    }

    #[test]
    fn test_load_restores_flushed_pack() {
        let (file, writer) = setup(CompletionMode::Inline);
        writer.link_vsid(5).unwrap();
        writer.set_entry(42, 4242, 3).unwrap();
        writer.flush(|_| {}).unwrap();

        let reader = ReverseMapPack::new(*writer.geometry(), file.clone(), "A0");
        let done = Arc::new(AtomicU32::new(0));
        reader.load(5, counting_callback(&done)).unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(reader.linked_vsid(), Some(5));
        assert_eq!(reader.get_entry(42).unwrap(), RevMapEntry::new(4242, 3));
        assert_eq!(reader.header().map(|h| h.vsid), Some(5));
    }

    #[test]
    fn test_load_never_written_region_is_unmapped() {
        let (_file, pack) = setup(CompletionMode::Inline);
        pack.load(9, |_| {}).unwrap();

        assert_eq!(pack.linked_vsid(), Some(9));
        assert!(pack.mapped_entries().unwrap().is_empty());
        assert_eq!(pack.header().map(|h| h.vsid), Some(9));
    }

    #[test]
    fn test_load_error_delivered_to_callback_only() {
        let (file, pack) = setup(CompletionMode::Inline);
        file.fail_next_io(-5);

        let seen = Arc::new(AtomicI32::new(0));
        let seen_cb = Arc::clone(&seen);
        pack.load(1, move |ctx| {
            seen_cb.store(ctx.error().unwrap_or(0), Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), -5);
        assert_eq!(pack.linked_vsid(), None);
        assert_eq!(pack.pending_io_count(), 0);
    }

    #[test]
    fn test_submit_failure_leaves_no_pending_io() {
        let (file, pack) = setup(CompletionMode::Inline);
        pack.link_vsid(0).unwrap();
        file.close().unwrap();

        assert_matches!(pack.flush(|_| {}), Err(Error::MetaFileNotOpen(_)));
        assert_eq!(pack.pending_io_count(), 0);
    }

    #[test]
    fn test_load_top_priority_marks_request() {
        let (file, pack) = setup(CompletionMode::Inline);
        pack.load_top_priority(0, |ctx| assert!(ctx.is_top_priority())).unwrap();
        assert_eq!(file.stats().snapshot().top_priority_issued, 1);
    }

    #[test]
    fn test_wait_on_idle_pack_returns() {
        let (_file, pack) = setup(CompletionMode::Inline);
        tokio_test::block_on(pack.wait_pending_io_done()).unwrap();
    }

    #[tokio::test]
    async fn test_wait_blocks_until_deferred_completion() {
        let (file, pack) = setup(CompletionMode::Deferred);
        let done = Arc::new(AtomicU32::new(0));

        pack.link_vsid(1).unwrap();
        pack.flush(counting_callback(&done)).unwrap();
        pack.load(2, counting_callback(&done)).unwrap();
        assert_eq!(pack.pending_io_count(), 2);

        let early = tokio::time::timeout(Duration::from_millis(20), pack.wait_pending_io_done()).await;
        assert!(early.is_err());

        assert_eq!(file.complete_pending(), 2);
        pack.wait_pending_io_done().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(pack.pending_io_count(), 0);
    }

    #[test]
    fn test_block_validity_follows_forward_map() {
        let (_file, mut pack) = setup(CompletionMode::Inline);
        let vsa_map = Arc::new(InMemoryVsaMap::new());
        let stripe_map = Arc::new(InMemoryStripeMap::new());
        let volumes = Arc::new(InMemoryVolumeManager::with_volumes([1]));
        pack.associate(volumes.clone(), 4, vsa_map.clone(), stripe_map.clone());
        assert_eq!(pack.wb_lsid(), Some(4));

        pack.link_vsid(6).unwrap();
        pack.set_entry(10, 500, 1).unwrap();
        vsa_map.set_vsa(1, 500, VirtualBlkAddr::new(6, 10));
        assert!(pack.is_block_valid(10).unwrap());

        // Overwritten elsewhere.
        vsa_map.set_vsa(1, 500, VirtualBlkAddr::new(7, 0));
        assert!(!pack.is_block_valid(10).unwrap());

        // Volume deleted.
        vsa_map.set_vsa(1, 500, VirtualBlkAddr::new(6, 10));
        volumes.remove_volume(1);
        assert!(!pack.is_block_valid(10).unwrap());

        // Never written.
        assert!(!pack.is_block_valid(11).unwrap());

        stripe_map.set_lsa(6, StripeAddr::in_write_buffer(4));
        assert_eq!(pack.linked_stripe_addr().unwrap().loc, StripeLoc::WriteBuffer);
    }

    #[test]
    fn test_unassociated_pack_cannot_translate() {
        let (_file, pack) = setup(CompletionMode::Inline);
        pack.link_vsid(0).unwrap();
        assert_matches!(pack.is_block_valid(0), Err(Error::PackNotAssociated));
        assert_matches!(pack.linked_stripe_addr(), Err(Error::PackNotAssociated));
    }

    #[test]
    fn test_panicking_callback_still_lowers_pending() {
        let (_file, pack) = setup(CompletionMode::Inline);
        pack.link_vsid(0).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pack.flush(|_| panic!("callback failed"))
        }));
        assert!(outcome.is_err());
        assert_eq!(pack.pending_io_count(), 0);

        // The pack keeps working afterwards.
        pack.flush(|_| {}).unwrap();
        tokio_test::block_on(pack.wait_pending_io_done()).unwrap();
    }

    #[test]
    fn test_relink_during_load_keeps_new_stripe() {
        let (file, pack) = setup(CompletionMode::Deferred);
        let done = Arc::new(AtomicU32::new(0));

        pack.load(5, counting_callback(&done)).unwrap();
        pack.link_vsid(7).unwrap();
        pack.set_entry(3, 333, 0).unwrap();

        assert_eq!(file.complete_pending(), 1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pack.linked_vsid(), Some(7));
        assert_eq!(pack.get_entry(3).unwrap(), RevMapEntry::new(333, 0));
        assert_eq!(pack.header().map(|h| h.vsid), Some(7));
        assert_eq!(pack.pending_io_count(), 0);
    }

    #[test]
    fn test_unlink_during_load_discards_read() {
        let (file, pack) = setup(CompletionMode::Deferred);
        pack.load(5, |_| {}).unwrap();
        pack.unlink_vsid();

        file.complete_pending();
        assert_eq!(pack.linked_vsid(), None);
    }
}
