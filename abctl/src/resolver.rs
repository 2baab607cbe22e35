// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CtlError, CtlResult};
use crate::slots::BOOT_AGING_PTN;

/// Maps partition label names to the whole-disk block device hosting them,
/// through the `by-partlabel` symlink directory.
#[derive(Debug, Clone)]
pub struct Resolver {
    dir: PathBuf,
}

impl Resolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn label_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// True if the label exists (following the symlink, as `stat` would).
    pub fn exists(&self, name: &str) -> bool {
        self.label_path(name).exists()
    }

    /// Resolves a partition label to the whole-disk device node, e.g.
    /// `boot_a` -> `/dev/sda`.
    pub fn resolve(&self, name: &str) -> CtlResult<PathBuf> {
        let partition = fs::canonicalize(self.label_path(name))
            .map_err(|_| CtlError::Missing(name.to_string()))?;
        Ok(trim_partition_suffix(&partition))
    }

    /// Groups the given labels by hosting disk, in path order. Labels that
    /// do not resolve are silently skipped: the partition may just not be
    /// present on this device.
    pub fn group<I>(&self, names: I) -> BTreeMap<PathBuf, Vec<String>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut map: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
        for name in names {
            if let Ok(dev) = self.resolve(&name) {
                map.entry(dev).or_default().push(name);
            }
        }
        map
    }

    /// True iff the label resolves onto the platform eMMC node. Unresolvable
    /// labels lean towards UFS; a wrong lean fails loudly later instead of
    /// silently skipping the LUN switch.
    pub fn is_backed_by_emmc(&self, name: &str, emmc_dev: &Path) -> bool {
        self.resolve(name).map(|dev| dev == emmc_dev).unwrap_or(false)
    }

    /// Number of `boot_*` labels, excluding the reserved `boot_aging`.
    /// A count of zero or one means the device is not A/B.
    pub fn slot_count(&self) -> u32 {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("boot_") && name != BOOT_AGING_PTN
            })
            .count() as u32
    }
}

/// Trims the partition-number suffix off a partition node to obtain the
/// whole-disk node: strip trailing digits, then a trailing `p` when a digit
/// precedes it (`sda3` -> `sda`, `mmcblk0p3` -> `mmcblk0`).
fn trim_partition_suffix(partition: &Path) -> PathBuf {
    let Some(name) = partition.file_name().and_then(|n| n.to_str()) else {
        return partition.to_path_buf();
    };
    let bytes = name.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_digit() {
        end -= 1;
    }
    if end >= 2 && bytes[end - 1] == b'p' && bytes[end - 2].is_ascii_digit() {
        end -= 1;
    }
    partition.with_file_name(&name[..end])
}
