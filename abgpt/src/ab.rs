// SPDX-License-Identifier: MIT

//! A/B slot attribute operations on top of [`GptDisk`].
//!
//! Bit 48 onwards in the 64-bit attribute field is vendor-defined; the
//! Qualcomm scheme keeps its slot state in the byte at entry offset 54:
//! the low nibble is the active-priority counter and bits 2/6/7 are the
//! active, boot-successful and unbootable flags.

use crate::errors::*;
use crate::gpt::{GptDisk, GptInstance};

/// Byte offset of the A/B flag byte within a partition entry (48 + 6).
pub const AB_FLAG_OFFSET: usize = 54;

const AB_ATTR_SHIFT: u32 = 48;

/// Active-slot flag, mask `0x04` on the flag byte. Lies inside the
/// priority nibble.
pub const AB_ATTR_SLOT_ACTIVE: u64 = 0x04 << AB_ATTR_SHIFT;
/// Boot-successful flag, mask `0x40` on the flag byte.
pub const AB_ATTR_BOOT_SUCCESSFUL: u64 = 0x40 << AB_ATTR_SHIFT;
/// Unbootable flag, mask `0x80` on the flag byte.
pub const AB_ATTR_UNBOOTABLE: u64 = 0x80 << AB_ATTR_SHIFT;

/// Low nibble of the flag byte: the bootloader's try-ordering counter.
const AB_PRIORITY_MASK: u64 = 0x0F << AB_ATTR_SHIFT;
const AB_PRIORITY_ACTIVE: u64 = 0x0F << AB_ATTR_SHIFT;

/// The three per-slot attribute bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AbAttr {
    SlotActive,
    BootSuccessful,
    Unbootable,
}

impl AbAttr {
    #[inline]
    pub fn mask(self) -> u64 {
        match self {
            AbAttr::SlotActive => AB_ATTR_SLOT_ACTIVE,
            AbAttr::BootSuccessful => AB_ATTR_BOOT_SUCCESSFUL,
            AbAttr::Unbootable => AB_ATTR_UNBOOTABLE,
        }
    }
}

impl GptDisk {
    /// Reads one attribute bit from the named entry in the given table.
    pub fn get_attr(&self, name: &str, which: GptInstance, attr: AbAttr) -> GptResult<bool> {
        let entry = self.find_entry(name, which).ok_or(GptError::NotFound)?;
        Ok(entry.attributes & attr.mask() != 0)
    }

    /// Sets or clears one attribute bit on the named entry in *both* tables.
    ///
    /// `SlotActive` moves the whole priority nibble: `0xF` when activating,
    /// `0x0` when deactivating. The upper nibble (successful/unbootable) is
    /// never touched by an active flip.
    pub fn set_attr(&mut self, name: &str, attr: AbAttr, value: bool) -> GptResult<()> {
        self.update_entry_pair(name, |e| match (attr, value) {
            (AbAttr::SlotActive, true) => {
                e.attributes = (e.attributes & !AB_PRIORITY_MASK) | AB_PRIORITY_ACTIVE;
            }
            (AbAttr::SlotActive, false) => e.attributes &= !AB_PRIORITY_MASK,
            (_, true) => e.attributes |= attr.mask(),
            (_, false) => e.attributes &= !attr.mask(),
        })
    }

    /// Unique GUID of the named entry (primary table).
    pub fn unique_guid(&self, name: &str) -> GptResult<[u8; 16]> {
        let entry = self
            .find_entry(name, GptInstance::Primary)
            .ok_or(GptError::NotFound)?;
        Ok(entry.unique_guid)
    }

    /// Re-seats the unique GUIDs of an A/B pair when `new_active` becomes
    /// the active side.
    ///
    /// The entry that is active *before* the call donates its GUID to the
    /// newly-active entry and the previously-inactive GUID moves to the
    /// newly-inactive one: flipping slots swaps the pair, re-selecting the
    /// already-active slot is a no-op. The firmware disambiguates slot
    /// priority partly by this GUID, not only by the active bit.
    pub fn swap_guids(&mut self, new_active: &str, new_inactive: &str) -> GptResult<()> {
        let donor = if self.get_attr(new_active, GptInstance::Primary, AbAttr::SlotActive)? {
            new_active
        } else if self.get_attr(new_inactive, GptInstance::Primary, AbAttr::SlotActive)? {
            new_inactive
        } else {
            return Err(GptError::Invalid("A/B: neither entry of the pair is active"));
        };

        let guid_active = self.unique_guid(donor)?;
        let other = if donor == new_active {
            new_inactive
        } else {
            new_active
        };
        let guid_inactive = self.unique_guid(other)?;

        self.update_entry_pair(new_active, |e| e.unique_guid = guid_active)?;
        self.update_entry_pair(new_inactive, |e| e.unique_guid = guid_inactive)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use abio::prelude::*;

    fn flag_byte(disk: &GptDisk, name: &str, which: GptInstance) -> u8 {
        let e = disk.find_entry(name, which).unwrap();
        (e.attributes >> AB_ATTR_SHIFT) as u8
    }

    fn load(img: &mut [u8]) -> GptDisk {
        let mut io = MemBlockIO::new(img);
        GptDisk::load(&mut io).unwrap()
    }

    #[test]
    fn get_attr_reads_bits() {
        let mut img = fixture::build_image(&[
            ("boot_a", 0x4F, [1; 16]),
            ("boot_b", 0x80, [2; 16]),
        ]);
        let disk = load(&mut img);

        assert!(disk
            .get_attr("boot_a", GptInstance::Primary, AbAttr::SlotActive)
            .unwrap());
        assert!(disk
            .get_attr("boot_a", GptInstance::Backup, AbAttr::BootSuccessful)
            .unwrap());
        assert!(!disk
            .get_attr("boot_a", GptInstance::Primary, AbAttr::Unbootable)
            .unwrap());
        assert!(disk
            .get_attr("boot_b", GptInstance::Primary, AbAttr::Unbootable)
            .unwrap());
        assert!(matches!(
            disk.get_attr("nope", GptInstance::Primary, AbAttr::SlotActive),
            Err(GptError::NotFound)
        ));
    }

    #[test]
    fn set_attr_updates_both_tables() {
        let mut img = fixture::build_image(&[("boot_a", 0x00, [1; 16])]);
        let mut disk = load(&mut img);

        disk.set_attr("boot_a", AbAttr::Unbootable, true).unwrap();
        assert_eq!(flag_byte(&disk, "boot_a", GptInstance::Primary), 0x80);
        assert_eq!(flag_byte(&disk, "boot_a", GptInstance::Backup), 0x80);

        // Backup equality holds for the whole entry, not just the flag.
        let p = disk.find_entry("boot_a", GptInstance::Primary).unwrap();
        let b = disk.find_entry("boot_a", GptInstance::Backup).unwrap();
        use zerocopy::IntoBytes;
        assert_eq!(p.as_bytes(), b.as_bytes());
    }

    #[test]
    fn active_flip_moves_nibble_and_preserves_high_bits() {
        let mut img = fixture::build_image(&[("boot_a", 0x40, [1; 16])]);
        let mut disk = load(&mut img);

        disk.set_attr("boot_a", AbAttr::SlotActive, true).unwrap();
        assert_eq!(flag_byte(&disk, "boot_a", GptInstance::Primary), 0x4F);

        disk.set_attr("boot_a", AbAttr::SlotActive, false).unwrap();
        assert_eq!(flag_byte(&disk, "boot_a", GptInstance::Primary), 0x40);
    }

    #[test]
    fn set_attr_is_idempotent() {
        let mut img = fixture::build_image(&[("boot_a", 0x0F, [1; 16])]);

        let mut once = load(&mut img.clone());
        once.set_attr("boot_a", AbAttr::BootSuccessful, true).unwrap();

        let mut twice = load(&mut img);
        twice.set_attr("boot_a", AbAttr::BootSuccessful, true).unwrap();
        twice.set_attr("boot_a", AbAttr::BootSuccessful, true).unwrap();

        use zerocopy::IntoBytes;
        let p1 = once.find_entry("boot_a", GptInstance::Primary).unwrap();
        let p2 = twice.find_entry("boot_a", GptInstance::Primary).unwrap();
        assert_eq!(p1.as_bytes(), p2.as_bytes());
    }

    #[test]
    fn swap_guids_flips_the_pair() {
        let mut img = fixture::build_image(&[
            ("system_a", 0x0F, [0xAA; 16]),
            ("system_b", 0x00, [0xBB; 16]),
        ]);
        let mut disk = load(&mut img);

        // B becomes active: the pair swaps.
        disk.swap_guids("system_b", "system_a").unwrap();
        assert_eq!(disk.unique_guid("system_b").unwrap(), [0xAA; 16]);
        assert_eq!(disk.unique_guid("system_a").unwrap(), [0xBB; 16]);

        let pb = disk.find_entry("system_b", GptInstance::Backup).unwrap();
        assert_eq!(pb.unique_guid, [0xAA; 16]);
    }

    #[test]
    fn swap_guids_reselect_is_noop() {
        let mut img = fixture::build_image(&[
            ("system_a", 0x0F, [0xAA; 16]),
            ("system_b", 0x00, [0xBB; 16]),
        ]);
        let mut disk = load(&mut img);

        disk.swap_guids("system_a", "system_b").unwrap();
        assert_eq!(disk.unique_guid("system_a").unwrap(), [0xAA; 16]);
        assert_eq!(disk.unique_guid("system_b").unwrap(), [0xBB; 16]);
    }

    #[test]
    fn swap_guids_needs_an_active_side() {
        let mut img = fixture::build_image(&[
            ("system_a", 0x00, [0xAA; 16]),
            ("system_b", 0x00, [0xBB; 16]),
        ]);
        let mut disk = load(&mut img);

        assert!(matches!(
            disk.swap_guids("system_a", "system_b"),
            Err(GptError::Invalid(_))
        ));
    }

    #[test]
    fn mutations_survive_commit() {
        let mut img = fixture::build_image(&[
            ("boot_a", 0x0F, [1; 16]),
            ("boot_b", 0x00, [2; 16]),
        ]);
        {
            let mut io = MemBlockIO::new(&mut img);
            let mut disk = GptDisk::load(&mut io).unwrap();
            disk.set_attr("boot_b", AbAttr::SlotActive, true).unwrap();
            disk.set_attr("boot_a", AbAttr::SlotActive, false).unwrap();
            disk.commit(&mut io).unwrap();
        }

        let disk = load(&mut img);
        assert_eq!(flag_byte(&disk, "boot_b", GptInstance::Primary), 0x0F);
        assert_eq!(flag_byte(&disk, "boot_a", GptInstance::Backup), 0x00);
    }
}
