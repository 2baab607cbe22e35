// SPDX-License-Identifier: MIT

//! Fabricated single-disk GPT images for the unit tests.

use crate::gpt::*;
use zerocopy::{FromBytes, IntoBytes};

pub(crate) const SECTORS: u64 = 64;
pub(crate) const BS: usize = 512;
pub(crate) const NUM_ENTRIES: usize = 8;

/// Builds a 64-sector image with both tables valid. Each part is
/// `(name, attribute byte 54, unique guid)`.
pub(crate) fn build_image(parts: &[(&str, u8, [u8; 16])]) -> Vec<u8> {
    assert!(parts.len() <= NUM_ENTRIES);
    let mut img = vec![0u8; SECTORS as usize * BS];
    let entry_size = GPT_ENTRY_BASE_SIZE;
    let arr_len = NUM_ENTRIES * entry_size;
    let entries_sectors = (arr_len as u64).div_ceil(BS as u64);
    let last_lba = SECTORS - 1;
    let backup_entries_lba = last_lba - entries_sectors;

    let mut arr = vec![0u8; arr_len];
    for (i, (name, attr_byte, guid)) in parts.iter().enumerate() {
        let start = 8 + i as u64 * 4;
        let e = GptEntry {
            type_guid: [0xA5; 16],
            unique_guid: *guid,
            start_lba: start,
            end_lba: start + 3,
            attributes: (*attr_byte as u64) << 48,
            name: encode_gpt_name(name),
        };
        arr[i * entry_size..(i + 1) * entry_size].copy_from_slice(e.as_bytes());
    }

    let mut primary = GptHeader {
        signature: *GPT_SIGNATURE,
        revision: 0x0001_0000,
        header_size: 92,
        header_crc: 0,
        reserved: 0,
        current_lba: GPT_PRIMARY_HEADER_LBA,
        backup_lba: last_lba,
        first_usable_lba: 8,
        last_usable_lba: backup_entries_lba - 1,
        disk_guid: [0xD7; 16],
        entries_lba: GPT_PRIMARY_ENTRIES_LBA,
        num_entries: NUM_ENTRIES as u32,
        entry_size: entry_size as u32,
        entries_crc: crc32(&arr),
        reserved2: [0u8; 420],
    };
    primary.header_crc = compute_header_crc32(primary);

    let mut backup = primary;
    backup.current_lba = last_lba;
    backup.backup_lba = GPT_PRIMARY_HEADER_LBA;
    backup.entries_lba = backup_entries_lba;
    backup.header_crc = compute_header_crc32(backup);

    img[BS..2 * BS].copy_from_slice(primary.as_bytes());
    let p_off = GPT_PRIMARY_ENTRIES_LBA as usize * BS;
    img[p_off..p_off + arr_len].copy_from_slice(&arr);
    let b_off = backup_entries_lba as usize * BS;
    img[b_off..b_off + arr_len].copy_from_slice(&arr);
    let h_off = last_lba as usize * BS;
    img[h_off..h_off + BS].copy_from_slice(backup.as_bytes());
    img
}

/// Rewrites the backup table in place with a smaller entry count, keeping it
/// individually valid so only the cross-table geometry check can reject it.
pub(crate) fn shrink_backup_entries(img: &mut [u8], new_count: u32) {
    let last = img.len() - BS;
    let mut hdr = GptHeader::read_from_bytes(&img[last..last + BS]).unwrap();
    hdr.num_entries = new_count;
    let entries_off = hdr.entries_lba as usize * BS;
    let arr_len = new_count as usize * hdr.entry_size as usize;
    hdr.entries_crc = crc32(&img[entries_off..entries_off + arr_len]);
    hdr.header_crc = compute_header_crc32(hdr);
    img[last..last + BS].copy_from_slice(hdr.as_bytes());
}
