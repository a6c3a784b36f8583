//! Classification of parsed segments into region buckets, and the
//! adjacent-row merger that prepares a [`FirmwareRecord`] for programming
//! (§3, §4.D).

use crate::memory_map::{region_of, RegionTag};
use crate::segment::Segment;

/// Classified, merged in-memory representation of a firmware file, ready
/// for programming (§3).
///
/// List-valued regions (`ApplicationFlash`, `EccFlash`, `Eeprom`, `SFlash`,
/// `Xip`) can hold multiple segments; single-valued regions hold at most
/// one. `order` records insertion order and drives re-serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareRecord {
    pub application_flash: Vec<Segment>,
    pub ecc_flash: Vec<Segment>,
    pub eeprom: Vec<Segment>,
    pub sflash: Vec<Segment>,
    pub xip: Vec<Segment>,

    pub nv_user: Option<Segment>,
    pub nv_wo: Option<Segment>,
    pub checksum: Option<Segment>,
    pub flash_protection: Option<Segment>,
    pub meta_data: Option<Segment>,
    pub chip_protection: Option<Segment>,
    pub efuse: Option<Segment>,

    /// Logical region name per current segment/slot, in insertion order
    /// (SFlash sub-regions are recorded under the logical name `"SFlash"`).
    pub order: Vec<&'static str>,
}

impl FirmwareRecord {
    /// Classify `segments` by region, dropping any segment that doesn't
    /// land fully inside a known region (§4.D Classification).
    pub fn classify(segments: Vec<Segment>) -> FirmwareRecord {
        let mut record = FirmwareRecord::default();

        for segment in segments {
            let Some(region) = region_of(segment.first()) else {
                continue;
            };
            if !region.contains(segment.last()) {
                // spans past the end of its starting region: not fully
                // inside any single region, so it's dropped too.
                continue;
            }

            let logical_name = region.tag.logical_name();
            record.order.push(logical_name);

            use RegionTag::*;
            match region.tag {
                ApplicationFlash => record.application_flash.push(segment),
                EccFlash => record.ecc_flash.push(segment),
                Eeprom => record.eeprom.push(segment),
                SFlashUserData | SFlashNar | SFlashPublicKey | SFlashToc2 | SFlashRtoc2 => {
                    record.sflash.push(segment)
                }
                Xip => record.xip.push(segment),
                NvUser => record.nv_user = Some(segment),
                NvWo => record.nv_wo = Some(segment),
                Checksum => record.checksum = Some(segment),
                FlashProtection => record.flash_protection = Some(segment),
                MetaData => record.meta_data = Some(segment),
                ChipProtection => record.chip_protection = Some(segment),
                EFuse => record.efuse = Some(segment),
            }
        }

        record
    }

    /// Run the adjacent-row merger (§4.D) over every list-valued bucket,
    /// consuming `self` and returning the merged record.
    pub fn merge(mut self, row_size: u32) -> FirmwareRecord {
        merge_bucket(&mut self.application_flash, &mut self.order, "ApplicationFlash", row_size);
        merge_bucket(&mut self.ecc_flash, &mut self.order, "EccFlash", row_size);
        merge_bucket(&mut self.eeprom, &mut self.order, "Eeprom", row_size);
        merge_bucket(&mut self.sflash, &mut self.order, "SFlash", row_size);
        merge_bucket(&mut self.xip, &mut self.order, "Xip", row_size);
        self
    }

    /// Total number of bytes across every list-valued and single-valued
    /// slot; used to size programming progress totals.
    pub fn total_bytes(&self) -> u64 {
        let list_bytes: usize = self.application_flash.iter().map(Segment::len).sum::<usize>()
            + self.ecc_flash.iter().map(Segment::len).sum::<usize>()
            + self.eeprom.iter().map(Segment::len).sum::<usize>()
            + self.sflash.iter().map(Segment::len).sum::<usize>()
            + self.xip.iter().map(Segment::len).sum::<usize>();

        let single_bytes: usize = [
            &self.nv_user,
            &self.nv_wo,
            &self.checksum,
            &self.flash_protection,
            &self.meta_data,
            &self.chip_protection,
            &self.efuse,
        ]
        .iter()
        .filter_map(|s| s.as_ref())
        .map(Segment::len)
        .sum();

        (list_bytes + single_bytes) as u64
    }
}

/// Merge adjacent segments in `bucket` whose row-aligned endpoints are
/// within one row of each other, filling the gap with `0x00` (§4.D).
///
/// Walks pairs in reverse so removing a consumed segment doesn't disturb
/// the index of pairs not yet visited.
fn merge_bucket(bucket: &mut Vec<Segment>, order: &mut Vec<&'static str>, logical_name: &'static str, row_size: u32) {
    if bucket.len() < 2 {
        return;
    }

    let mut i = bucket.len() - 1;
    while i > 0 {
        let prev_first_row = bucket[i - 1].first_row(row_size);
        let prev_last_row = bucket[i - 1].last_row(row_size);
        let curr_first_row = bucket[i].first_row(row_size);
        let curr_last_row = bucket[i].last_row(row_size);

        let forward = curr_first_row >= prev_last_row && curr_first_row - prev_last_row <= row_size;
        let backward = prev_first_row >= curr_last_row && prev_first_row - curr_last_row <= row_size;

        if forward {
            let gap_start = bucket[i - 1].last() + 1;
            let gap_end = bucket[i].first();
            if gap_end > gap_start {
                bucket[i - 1].pad_to(gap_end - 1, 0x00);
            }
            let consumed = bucket.remove(i);
            bucket[i - 1].extend(consumed);
            remove_one_order_entry(order, logical_name);
        } else if backward {
            // bucket[i - 1] sits at the *higher* address here, so the merged
            // segment must start at bucket[i]'s (lower) address: pad its tail
            // up to bucket[i - 1]'s start, then append bucket[i - 1]'s bytes
            // after it.
            let gap_start = bucket[i].last() + 1;
            let gap_end = bucket[i - 1].first();
            if gap_end > gap_start {
                bucket[i].pad_to(gap_end - 1, 0x00);
            }
            let high = bucket.remove(i - 1);
            bucket[i - 1].extend(high);
            remove_one_order_entry(order, logical_name);
        }

        i -= 1;
    }
}

/// Remove exactly one `order` entry matching `logical_name`, from the end,
/// mirroring the consumed segment's removal.
fn remove_one_order_entry(order: &mut Vec<&'static str>, logical_name: &'static str) {
    if let Some(pos) = order.iter().rposition(|tag| *tag == logical_name) {
        order.remove(pos);
    }
}
