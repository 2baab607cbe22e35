// SPDX-License-Identifier: MIT
#![allow(dead_code)]

//! Fabricated device environment: GPT disk images plus a fake
//! `by-partlabel` symlink farm in a temp directory.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use zerocopy::IntoBytes;

use abctl::engine::SlotCtl;
use abctl::ufs::{BootChain, BootLunSwitch, UfsError};
use abgpt::gpt::{
    encode_gpt_name, GptEntry, GptHeader, GPT_PRIMARY_ENTRIES_LBA, GPT_PRIMARY_HEADER_LBA,
    GPT_SIGNATURE,
};
use abgpt::{GptDisk, GptInstance};
use abio::prelude::*;

pub const BS: usize = 512;
pub const SECTORS: u64 = 128;
pub const NUM_ENTRIES: usize = 32;
const ENTRY_SIZE: usize = 128;

fn header_crc(mut hdr: GptHeader) -> u32 {
    hdr.header_crc = 0;
    crc32fast::hash(&hdr.as_bytes()[..hdr.header_size as usize])
}

/// Builds an image with both GPT tables valid. Each part is
/// `(name, attribute byte 54, unique guid)`.
pub fn build_image(parts: &[(&str, u8, [u8; 16])]) -> Vec<u8> {
    assert!(parts.len() <= NUM_ENTRIES);
    let mut img = vec![0u8; SECTORS as usize * BS];
    let arr_len = NUM_ENTRIES * ENTRY_SIZE;
    let entries_sectors = (arr_len as u64).div_ceil(BS as u64);
    let last_lba = SECTORS - 1;
    let backup_entries_lba = last_lba - entries_sectors;

    let mut arr = vec![0u8; arr_len];
    for (i, (name, attr_byte, guid)) in parts.iter().enumerate() {
        let start = 16 + i as u64 * 4;
        let entry = GptEntry {
            type_guid: [0xA5; 16],
            unique_guid: *guid,
            start_lba: start,
            end_lba: start + 3,
            attributes: (*attr_byte as u64) << 48,
            name: encode_gpt_name(name),
        };
        arr[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE].copy_from_slice(entry.as_bytes());
    }

    let mut primary = GptHeader {
        signature: *GPT_SIGNATURE,
        revision: 0x0001_0000,
        header_size: 92,
        header_crc: 0,
        reserved: 0,
        current_lba: GPT_PRIMARY_HEADER_LBA,
        backup_lba: last_lba,
        first_usable_lba: GPT_PRIMARY_ENTRIES_LBA + entries_sectors,
        last_usable_lba: backup_entries_lba - 1,
        disk_guid: [0xD7; 16],
        entries_lba: GPT_PRIMARY_ENTRIES_LBA,
        num_entries: NUM_ENTRIES as u32,
        entry_size: ENTRY_SIZE as u32,
        entries_crc: crc32fast::hash(&arr),
        reserved2: [0u8; 420],
    };
    primary.header_crc = header_crc(primary);

    let mut backup = primary;
    backup.current_lba = last_lba;
    backup.backup_lba = GPT_PRIMARY_HEADER_LBA;
    backup.entries_lba = backup_entries_lba;
    backup.header_crc = header_crc(backup);

    img[BS..2 * BS].copy_from_slice(primary.as_bytes());
    let p_off = GPT_PRIMARY_ENTRIES_LBA as usize * BS;
    img[p_off..p_off + arr_len].copy_from_slice(&arr);
    let b_off = backup_entries_lba as usize * BS;
    img[b_off..b_off + arr_len].copy_from_slice(&arr);
    let h_off = last_lba as usize * BS;
    img[h_off..h_off + BS].copy_from_slice(backup.as_bytes());
    img
}

pub struct FakeEnv {
    root: TempDir,
    pub dev: PathBuf,
    pub labels: PathBuf,
    pub cmdline: PathBuf,
}

impl FakeEnv {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let dev = root.path().join("dev");
        let labels = dev.join("by-partlabel");
        fs::create_dir_all(&labels).unwrap();
        let cmdline = root.path().join("cmdline");
        fs::write(&cmdline, "").unwrap();
        Self {
            root,
            dev,
            labels,
            cmdline,
        }
    }

    /// Creates a disk image named `disk`, a partition node `<disk>1` and a
    /// partlabel symlink per part.
    pub fn add_disk(&self, disk: &str, parts: &[(&str, u8, [u8; 16])]) {
        fs::write(self.dev.join(disk), build_image(parts)).unwrap();
        let node = self.dev.join(format!("{disk}1"));
        fs::write(&node, b"").unwrap();
        for (name, _, _) in parts {
            symlink(&node, self.labels.join(name)).unwrap();
        }
    }

    pub fn set_cmdline(&self, content: &str) {
        fs::write(&self.cmdline, content).unwrap();
    }

    pub fn ctl(&self, lun_switch: Box<dyn BootLunSwitch>) -> SlotCtl {
        SlotCtl::new()
            .with_partlabel_dir(&self.labels)
            .with_cmdline_path(&self.cmdline)
            .with_emmc_dev(self.dev.join("mmcblk0"))
            .with_lun_switch(lun_switch)
    }

    pub fn load_disk(&self, disk: &str) -> GptDisk {
        let mut io = DevBlockIO::open(&self.dev.join(disk), false).unwrap();
        GptDisk::load(&mut io).unwrap()
    }

    pub fn disk_bytes(&self, disk: &str) -> Vec<u8> {
        fs::read(self.dev.join(disk)).unwrap()
    }
}

pub fn flag_byte(disk: &GptDisk, name: &str, which: GptInstance) -> u8 {
    (disk.find_entry(name, which).unwrap().attributes >> 48) as u8
}

/// Records every LUN id the engine asks for.
#[derive(Clone, Default)]
pub struct FakeLun {
    pub calls: Arc<Mutex<Vec<u8>>>,
}

impl BootLunSwitch for FakeLun {
    fn set_boot_lun(&mut self, chain: BootChain) -> Result<(), UfsError> {
        self.calls.lock().unwrap().push(chain.lun_id());
        Ok(())
    }
}

/// Behaves like a kernel without CONFIG_SCSI_UFS_BSG.
pub struct MissingLun;

impl BootLunSwitch for MissingLun {
    fn set_boot_lun(&mut self, _chain: BootChain) -> Result<(), UfsError> {
        Err(UfsError::Missing)
    }
}

/// A device where slot A is active and nothing is marked successful yet.
pub fn base_parts() -> Vec<(&'static str, u8, [u8; 16])> {
    vec![
        ("boot_a", 0x0F, [0xA1; 16]),
        ("boot_b", 0x00, [0xB1; 16]),
        ("dtbo_a", 0x0F, [0xA2; 16]),
        ("dtbo_b", 0x00, [0xB2; 16]),
        ("xbl_a", 0x0F, [0xA3; 16]),
        ("xbl_b", 0x00, [0xB3; 16]),
        ("userdata", 0x00, [0xC0; 16]),
    ]
}
