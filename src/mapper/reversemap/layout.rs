//! Reverse map page layout
//!
//! One stripe's reverse map is persisted as `num_mpages_per_stripe` fixed
//! size pages. Entries are packed sector by sector, so only whole sectors of
//! a page carry entries. The first sector of page 0 holds the stripe header,
//! which costs page 0 exactly one sector's worth of entries.
//!
//! ```text
//!            ┌────────┬────────┬────────┬─────┬────────┬──────┐
//!  page 0    │ header │ e0..31 │ e32..63│ ... │  ...   │ tail │
//!            └────────┴────────┴────────┴─────┴────────┴──────┘
//!            ┌────────┬────────┬────────┬─────┬────────┬──────┐
//!  page 1..  │ entries│ entries│ entries│ ... │entries │ tail │
//!            └────────┴────────┴────────┴─────┴────────┴──────┘
//!             512 B sectors, 32 × 16 B entries each; tail < 512 B unused
//! ```
//!
//! All integers are little-endian. This layout is what crash recovery reads
//! back after a restart, so it must not change.

use bytes::{Buf, BufMut};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::mapper::address::{BlkAddr, StripeId, VolumeId, INVALID_RBA, INVALID_VOLUME};

// =============================================================================
// Constants
// =============================================================================

/// Sector size pages are packed in.
pub const REVMAP_SECTOR_SIZE: u32 = 512;

/// Size of one persisted entry.
pub const REVMAP_ENTRY_SIZE: u32 = 16;

/// Entries held by one sector.
pub const REVMAP_ENTRIES_PER_SECTOR: u32 = REVMAP_SECTOR_SIZE / REVMAP_ENTRY_SIZE;

/// Marks a page 0 that carries a header ("RVMP").
pub const REVMAP_PAGE_MAGIC: u32 = 0x5256_4D50;

/// Byte filling unmapped entries and padding.
pub const REVMAP_FILL_BYTE: u8 = 0xFF;

/// Integer division rounding up.
#[inline]
pub fn divide_up(value: u64, divisor: u64) -> u64 {
    value.div_ceil(divisor)
}

// =============================================================================
// Geometry
// =============================================================================

/// Page geometry of one stripe's reverse map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevMapGeometry {
    mpage_size: u32,
    blks_per_stripe: u32,
    entries_per_normal_page: u32,
    entries_per_first_page: u32,
    num_mpages_per_stripe: u32,
    file_size_per_stripe: u64,
}

impl RevMapGeometry {
    /// Derive the geometry for `blks_per_stripe` entries in `mpage_size` pages.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` when the stripe is empty or a page cannot reserve
    /// a header sector and still hold at least one entry.
    pub fn new(mpage_size: u32, blks_per_stripe: u32) -> Result<Self> {
        if blks_per_stripe == 0 {
            return Err(Error::InvalidGeometry(
                "blks_per_stripe must be > 0".into(),
            ));
        }

        let sectors_per_page = mpage_size / REVMAP_SECTOR_SIZE;
        if sectors_per_page < 2 {
            return Err(Error::InvalidGeometry(format!(
                "mpage_size {} holds {} whole {}-byte sectors; need one for the header and one for entries",
                mpage_size, sectors_per_page, REVMAP_SECTOR_SIZE
            )));
        }

        let entries_per_normal_page = sectors_per_page * REVMAP_ENTRIES_PER_SECTOR;
        let entries_per_first_page = entries_per_normal_page - REVMAP_ENTRIES_PER_SECTOR;

        let num_mpages_per_stripe = if blks_per_stripe <= entries_per_first_page {
            1
        } else {
            let rest = (blks_per_stripe - entries_per_first_page) as u64;
            1 + divide_up(rest, entries_per_normal_page as u64) as u32
        };

        Ok(Self {
            mpage_size,
            blks_per_stripe,
            entries_per_normal_page,
            entries_per_first_page,
            num_mpages_per_stripe,
            file_size_per_stripe: mpage_size as u64 * num_mpages_per_stripe as u64,
        })
    }

    pub fn mpage_size(&self) -> u32 {
        self.mpage_size
    }

    pub fn blks_per_stripe(&self) -> u32 {
        self.blks_per_stripe
    }

    pub fn entries_per_normal_page(&self) -> u32 {
        self.entries_per_normal_page
    }

    pub fn entries_per_first_page(&self) -> u32 {
        self.entries_per_first_page
    }

    pub fn num_mpages_per_stripe(&self) -> u32 {
        self.num_mpages_per_stripe
    }

    pub fn file_size_per_stripe(&self) -> u64 {
        self.file_size_per_stripe
    }

    /// Size of the whole-array file for `max_vsid` stripes.
    pub fn whole_file_size(&self, max_vsid: u32) -> u64 {
        self.file_size_per_stripe * max_vsid as u64
    }

    /// Byte offset of stripe `vsid`'s region in the whole-array file.
    pub fn region_offset(&self, vsid: StripeId) -> u64 {
        self.file_size_per_stripe * vsid as u64
    }

    /// Byte offset of entry `index` within a stripe region.
    ///
    /// `index` must be `< blks_per_stripe`.
    pub fn entry_offset(&self, index: u64) -> usize {
        debug_assert!(index < self.blks_per_stripe as u64);

        let first = self.entries_per_first_page as u64;
        let (page, slot, skip) = if index < first {
            (0, index, REVMAP_SECTOR_SIZE as u64)
        } else {
            let rest = index - first;
            let normal = self.entries_per_normal_page as u64;
            (1 + rest / normal, rest % normal, 0)
        };

        let sector = slot / REVMAP_ENTRIES_PER_SECTOR as u64;
        let within = slot % REVMAP_ENTRIES_PER_SECTOR as u64;
        (page * self.mpage_size as u64
            + skip
            + sector * REVMAP_SECTOR_SIZE as u64
            + within * REVMAP_ENTRY_SIZE as u64) as usize
    }

    /// Fail if later configuration reads disagree with this geometry.
    pub fn ensure_matches(&self, mpage_size: u32, blks_per_stripe: u32) -> Result<()> {
        if mpage_size != self.mpage_size {
            return Err(Error::GeometryMismatch {
                field: "mpage_size",
                cached: self.mpage_size as u64,
                observed: mpage_size as u64,
            });
        }
        if blks_per_stripe != self.blks_per_stripe {
            return Err(Error::GeometryMismatch {
                field: "blks_per_stripe",
                cached: self.blks_per_stripe as u64,
                observed: blks_per_stripe as u64,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Entry
// =============================================================================

/// Logical owner of one physical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RevMapEntry {
    pub rba: BlkAddr,
    pub volume_id: VolumeId,
}

impl RevMapEntry {
    pub const UNMAPPED: RevMapEntry = RevMapEntry {
        rba: INVALID_RBA,
        volume_id: INVALID_VOLUME,
    };

    pub fn new(rba: BlkAddr, volume_id: VolumeId) -> Self {
        Self { rba, volume_id }
    }

    pub fn is_unmapped(&self) -> bool {
        self.rba == INVALID_RBA || self.volume_id == INVALID_VOLUME
    }

    /// Write the 16-byte on-disk form into `dst`.
    pub fn encode(&self, mut dst: &mut [u8]) {
        dst.put_u64_le(self.rba);
        dst.put_u32_le(self.volume_id);
        dst.put_u32_le(u32::MAX);
    }

    /// Read an entry from its 16-byte on-disk form.
    pub fn decode(mut src: &[u8]) -> Self {
        let rba = src.get_u64_le();
        let volume_id = src.get_u32_le();
        Self { rba, volume_id }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Stripe-level metadata in the first sector of page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevMapPageHeader {
    pub vsid: StripeId,
    pub wb_lsid: StripeId,
    pub num_blks: u32,
}

impl RevMapPageHeader {
    /// Write the header sector. `dst` must be at least one sector long.
    pub fn encode(&self, dst: &mut [u8]) {
        let sector = &mut dst[..REVMAP_SECTOR_SIZE as usize];
        sector.fill(REVMAP_FILL_BYTE);
        let mut cursor = &mut sector[..];
        cursor.put_u32_le(REVMAP_PAGE_MAGIC);
        cursor.put_u32_le(self.vsid);
        cursor.put_u32_le(self.wb_lsid);
        cursor.put_u32_le(self.num_blks);
    }

    /// Read the header sector, `None` if the page was never stamped.
    pub fn decode(mut src: &[u8]) -> Option<Self> {
        if src.len() < 16 || src.get_u32_le() != REVMAP_PAGE_MAGIC {
            return None;
        }
        Some(Self {
            vsid: src.get_u32_le(),
            wb_lsid: src.get_u32_le(),
            num_blks: src.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_geometry_4k_page_exact_first_page() {
        let geo = RevMapGeometry::new(4096, 224).unwrap();
        assert_eq!(geo.entries_per_normal_page(), 256);
        assert_eq!(geo.entries_per_first_page(), 224);
        assert_eq!(geo.num_mpages_per_stripe(), 1);
        assert_eq!(geo.file_size_per_stripe(), 4096);
    }

    #[test]
    fn test_geometry_4k_page_one_past_first_page() {
        let geo = RevMapGeometry::new(4096, 225).unwrap();
        assert_eq!(geo.num_mpages_per_stripe(), 2);
        assert_eq!(geo.file_size_per_stripe(), 8192);
    }

    #[test]
    fn test_geometry_metafs_page() {
        // 4032-byte pages hold 7 whole sectors.
        let geo = RevMapGeometry::new(4032, 128).unwrap();
        assert_eq!(geo.entries_per_normal_page(), 224);
        assert_eq!(geo.entries_per_first_page(), 192);
        assert_eq!(geo.num_mpages_per_stripe(), 1);
        assert_eq!(geo.file_size_per_stripe(), 4032);

        let geo = RevMapGeometry::new(4032, 192 + 224 + 1).unwrap();
        assert_eq!(geo.num_mpages_per_stripe(), 3);
    }

    #[test]
    fn test_whole_file_size() {
        let geo = RevMapGeometry::new(4096, 224).unwrap();
        assert_eq!(geo.whole_file_size(1024), 4_194_304);
        assert_eq!(geo.region_offset(3), 3 * 4096);
    }

    #[test]
    fn test_geometry_rejects_tiny_pages() {
        assert_matches!(RevMapGeometry::new(512, 1), Err(Error::InvalidGeometry(_)));
        assert_matches!(RevMapGeometry::new(1000, 1), Err(Error::InvalidGeometry(_)));
        assert!(RevMapGeometry::new(1024, 1).is_ok());
    }

    #[test]
    fn test_geometry_rejects_empty_stripe() {
        assert_matches!(RevMapGeometry::new(4096, 0), Err(Error::InvalidGeometry(_)));
    }

    #[test]
    fn test_ensure_matches() {
        let geo = RevMapGeometry::new(4096, 224).unwrap();
        assert!(geo.ensure_matches(4096, 224).is_ok());
        assert_matches!(
            geo.ensure_matches(8192, 224),
            Err(Error::GeometryMismatch { field: "mpage_size", .. })
        );
        assert_matches!(
            geo.ensure_matches(4096, 225),
            Err(Error::GeometryMismatch { field: "blks_per_stripe", .. })
        );
    }

    #[test]
    fn test_entry_offsets_skip_header_and_page_tail() {
        let geo = RevMapGeometry::new(4032, 500).unwrap();
        assert_eq!(geo.entry_offset(0), 512);
        assert_eq!(geo.entry_offset(31), 512 + 31 * 16);
        assert_eq!(geo.entry_offset(32), 1024);
        // Last entry of page 0 ends at the last whole sector.
        assert_eq!(geo.entry_offset(191), 3584 - 16);
        // Page 1 starts without a header sector.
        assert_eq!(geo.entry_offset(192), 4032);
        assert_eq!(geo.entry_offset(192 + 224), 2 * 4032);
    }

    #[test]
    fn test_entry_codec() {
        let mut buf = [0u8; 16];
        RevMapEntry::new(0x0102_0304_0506_0708, 9).encode(&mut buf);
        assert_eq!(&buf[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&buf[8..12], &[9, 0, 0, 0]);
        assert_eq!(&buf[12..], &[0xFF; 4]);
        assert_eq!(RevMapEntry::decode(&buf), RevMapEntry::new(0x0102_0304_0506_0708, 9));
    }

    #[test]
    fn test_unmapped_entry_is_all_ones() {
        let mut buf = [0u8; 16];
        RevMapEntry::UNMAPPED.encode(&mut buf);
        assert_eq!(buf, [0xFF; 16]);
        assert!(RevMapEntry::decode(&buf).is_unmapped());
    }

    #[test]
    fn test_header_codec() {
        let mut sector = vec![0u8; 512];
        let header = RevMapPageHeader {
            vsid: 17,
            wb_lsid: 3,
            num_blks: 224,
        };
        header.encode(&mut sector);
        assert_eq!(&sector[..4], &REVMAP_PAGE_MAGIC.to_le_bytes());
        assert!(sector[16..].iter().all(|&b| b == REVMAP_FILL_BYTE));
        assert_eq!(RevMapPageHeader::decode(&sector), Some(header));
    }

    #[test]
    fn test_header_absent_on_zeroed_page() {
        assert_eq!(RevMapPageHeader::decode(&[0u8; 512]), None);
        assert_eq!(RevMapPageHeader::decode(&[0u8; 4]), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Property: every stripe fits, and the file size is pages × page size.
        #[test]
        fn prop_pages_cover_all_entries(
            sectors in 2u32..=32,
            tail in 0u32..512,
            blks in 1u32..=20_000,
        ) {
            let mpage = sectors * REVMAP_SECTOR_SIZE + tail;
            let geo = RevMapGeometry::new(mpage, blks)?;

            prop_assert!(geo.num_mpages_per_stripe() >= 1);
            prop_assert_eq!(
                geo.file_size_per_stripe(),
                mpage as u64 * geo.num_mpages_per_stripe() as u64
            );

            let capacity = geo.entries_per_first_page() as u64
                + (geo.num_mpages_per_stripe() as u64 - 1) * geo.entries_per_normal_page() as u64;
            prop_assert!(capacity >= blks as u64);

            // One page fewer would not be enough.
            if geo.num_mpages_per_stripe() > 1 {
                prop_assert!(capacity - (geo.entries_per_normal_page() as u64) < blks as u64);
            }
        }

        /// Property: entry slots are distinct, in-region, and clear of the header.
        #[test]
        fn prop_entry_offsets_in_bounds(
            sectors in 2u32..=16,
            blks in 1u32..=3_000,
        ) {
            let mpage = sectors * REVMAP_SECTOR_SIZE;
            let geo = RevMapGeometry::new(mpage, blks)?;

            let mut previous = None;
            for idx in 0..blks as u64 {
                let off = geo.entry_offset(idx);
                prop_assert!(off >= REVMAP_SECTOR_SIZE as usize);
                prop_assert!(off + REVMAP_ENTRY_SIZE as usize <= geo.file_size_per_stripe() as usize);
                if let Some(prev) = previous {
                    prop_assert!(off > prev);
                }
                previous = Some(off);
            }
        }

        /// Property: boundary at the first page's capacity.
        #[test]
        fn prop_first_page_boundary(sectors in 2u32..=32) {
            let mpage = sectors * REVMAP_SECTOR_SIZE;
            let first = (sectors - 1) * REVMAP_ENTRIES_PER_SECTOR;

            prop_assert_eq!(RevMapGeometry::new(mpage, first)?.num_mpages_per_stripe(), 1);
            prop_assert_eq!(RevMapGeometry::new(mpage, first + 1)?.num_mpages_per_stripe(), 2);
        }

        /// Property: whole file is per-stripe size times stripe count.
        #[test]
        fn prop_whole_file_size(blks in 1u32..=4096, max_vsid in 1u32..=1_000_000) {
            let geo = RevMapGeometry::new(4096, blks)?;
            prop_assert_eq!(
                geo.whole_file_size(max_vsid),
                geo.file_size_per_stripe() * max_vsid as u64
            );
        }
    }
}
