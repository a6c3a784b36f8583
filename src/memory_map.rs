//! PSoC6 address-space regions and the row size used for flash operations.

use std::fmt;

/// A named, non-overlapping range of the target's 32-bit address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub tag: RegionTag,
    pub start: u32,
    pub length: u32,
}

impl MemoryRegion {
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.start.saturating_add(self.length)
    }

    pub const fn end(&self) -> u32 {
        self.start + self.length - 1
    }
}

/// Region identity used to classify segments in a [`FirmwareRecord`](crate::firmware::FirmwareRecord).
///
/// The five SFlash sub-regions are distinguished at classification time but are
/// aggregated under a single `SFlash` bucket once a segment is filed, per §4.D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum RegionTag {
    ApplicationFlash,
    EccFlash,
    Eeprom,
    SFlashUserData,
    SFlashNar,
    SFlashPublicKey,
    SFlashToc2,
    SFlashRtoc2,
    Xip,
    NvUser,
    NvWo,
    Checksum,
    FlashProtection,
    MetaData,
    ChipProtection,
    EFuse,
}

impl RegionTag {
    /// Collapse the five SFlash sub-region tags onto the logical `SFlash` bucket
    /// used for merging and `order` bookkeeping (§4.D).
    pub fn logical_name(self) -> &'static str {
        use RegionTag::*;
        match self {
            SFlashUserData | SFlashNar | SFlashPublicKey | SFlashToc2 | SFlashRtoc2 => "SFlash",
            other => other.static_name(),
        }
    }

    fn static_name(self) -> &'static str {
        use RegionTag::*;
        match self {
            ApplicationFlash => "ApplicationFlash",
            EccFlash => "EccFlash",
            Eeprom => "Eeprom",
            SFlashUserData => "SFlashUserData",
            SFlashNar => "SFlashNar",
            SFlashPublicKey => "SFlashPublicKey",
            SFlashToc2 => "SFlashToc2",
            SFlashRtoc2 => "SFlashRtoc2",
            Xip => "Xip",
            NvUser => "NvUser",
            NvWo => "NvWo",
            Checksum => "Checksum",
            FlashProtection => "FlashProtection",
            MetaData => "MetaData",
            ChipProtection => "ChipProtection",
            EFuse => "EFuse",
        }
    }

    /// Whether this region is a list-valued bucket (can hold multiple segments)
    /// or a single-valued slot, per §3.
    pub fn is_list_valued(self) -> bool {
        use RegionTag::*;
        matches!(
            self,
            ApplicationFlash
                | EccFlash
                | Eeprom
                | SFlashUserData
                | SFlashNar
                | SFlashPublicKey
                | SFlashToc2
                | SFlashRtoc2
                | Xip
        )
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.static_name())
    }
}

/// The row size used for flash programming/merging on PSoC6 (§4.A).
pub const PSOC6_ROW_SIZE: u32 = 512;

/// Static, non-overlapping PSoC6 region table (§6).
pub const PSOC6_REGIONS: &[MemoryRegion] = &[
    MemoryRegion { tag: RegionTag::ApplicationFlash, start: 0x1000_0000, length: 0x0020_0000 },
    MemoryRegion { tag: RegionTag::Eeprom, start: 0x1400_0000, length: 0x0000_8000 },
    MemoryRegion { tag: RegionTag::SFlashUserData, start: 0x1600_0800, length: 0x0000_0800 },
    MemoryRegion { tag: RegionTag::SFlashNar, start: 0x1600_1A00, length: 0x0000_0200 },
    MemoryRegion { tag: RegionTag::SFlashPublicKey, start: 0x1600_5A00, length: 0x0000_0C00 },
    MemoryRegion { tag: RegionTag::SFlashToc2, start: 0x1600_7C00, length: 0x0000_0200 },
    MemoryRegion { tag: RegionTag::SFlashRtoc2, start: 0x1600_7E00, length: 0x0000_0200 },
    MemoryRegion { tag: RegionTag::Xip, start: 0x1800_0000, length: 0x7800_0000 },
    MemoryRegion { tag: RegionTag::Checksum, start: 0x9030_0000, length: 0x0000_0100 },
    MemoryRegion { tag: RegionTag::MetaData, start: 0x9050_0000, length: 0x0000_0100 },
    MemoryRegion { tag: RegionTag::EFuse, start: 0x9070_0000, length: 0x0000_1000 },
];

/// Resolve an address to the first containing region, or `None` if unmapped (§4.A).
pub fn region_of(addr: u32) -> Option<&'static MemoryRegion> {
    PSOC6_REGIONS.iter().find(|region| region.contains(addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_region_resolves_to_itself() {
        for region in PSOC6_REGIONS {
            let found = region_of(region.start).expect("start address must resolve");
            assert_eq!(found.tag, region.tag);
        }
    }

    #[test]
    fn boundaries_resolve_correctly() {
        for region in PSOC6_REGIONS {
            if region.start > 0 {
                // one below the start is either unmapped or belongs to a prior region,
                // but must never resolve to *this* region.
                if let Some(found) = region_of(region.start - 1) {
                    assert_ne!(found.tag, region.tag);
                }
            }
            // one past the end must not resolve to this region either.
            if let Some(found) = region_of(region.end() + 1) {
                assert_ne!(found.tag, region.tag);
            }
        }
    }

    #[test]
    fn unmapped_address_is_none() {
        assert!(region_of(0x0000_0000).is_none());
        assert!(region_of(0x1000_0000 - 1).is_none());
    }

    #[test]
    fn application_flash_row_size_is_512() {
        assert_eq!(PSOC6_ROW_SIZE, 512);
    }
}
