// SPDX-License-Identifier: MIT

//! The A/B slot state machine over the GPT engine.
//!
//! Every mutating operation fans out over the fixed A/B pair list, grouped
//! by hosting disk; each disk is loaded, mutated and committed in one pass.
//! Commits are per-disk, there is no cross-disk two-phase.

use std::path::PathBuf;

use abgpt::{AbAttr, GptDisk, GptInstance};
use abio::prelude::*;

use crate::cmdline;
use crate::error::{CtlError, CtlResult};
use crate::resolver::Resolver;
use crate::slots::*;
use crate::ufs::{BootChain, BootLunSwitch, UfsBsg, UfsError};
use crate::{log_info, log_verbose};

/// The boot-control capability object.
///
/// All paths the engine touches are parameters, so the whole state machine
/// can be pointed at a fabricated environment. The authoritative state lives
/// on disk; this object carries no slot state of its own.
pub struct SlotCtl {
    resolver: Resolver,
    cmdline_path: PathBuf,
    emmc_dev: PathBuf,
    lun_switch: Box<dyn BootLunSwitch>,
    ignore_missing_bsg: bool,
}

impl SlotCtl {
    pub fn new() -> Self {
        Self {
            resolver: Resolver::new(DEFAULT_PARTLABEL_DIR),
            cmdline_path: DEFAULT_CMDLINE_PATH.into(),
            emmc_dev: EMMC_DEVICE.into(),
            lun_switch: Box::new(UfsBsg::new()),
            ignore_missing_bsg: false,
        }
    }

    pub fn with_partlabel_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resolver = Resolver::new(dir);
        self
    }

    pub fn with_cmdline_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cmdline_path = path.into();
        self
    }

    pub fn with_emmc_dev(mut self, dev: impl Into<PathBuf>) -> Self {
        self.emmc_dev = dev.into();
        self
    }

    pub fn with_lun_switch(mut self, lun_switch: Box<dyn BootLunSwitch>) -> Self {
        self.lun_switch = lun_switch;
        self
    }

    pub fn ignore_missing_bsg(mut self, ignore: bool) -> Self {
        self.ignore_missing_bsg = ignore;
        self
    }

    pub fn slot_count(&self) -> u32 {
        self.resolver.slot_count()
    }

    fn check_slot(&self, slot: Slot) -> CtlResult<()> {
        let count = self.slot_count();
        if count < 1 || slot.index() > count - 1 {
            return Err(CtlError::InvalidArgument(
                "slot index out of range for this device",
            ));
        }
        Ok(())
    }

    fn boot_partition(slot: Slot) -> String {
        format!("{PTN_BOOT}{}", slot.suffix())
    }

    /// One attribute bit of the slot's boot partition, from the primary
    /// table (load has already verified both tables agree).
    fn boot_attr(&self, slot: Slot, attr: AbAttr) -> CtlResult<bool> {
        let name = Self::boot_partition(slot);
        let dev = self.resolver.resolve(&name)?;
        let mut io = DevBlockIO::open(&dev, false)?;
        let disk = GptDisk::load(&mut io)?;
        Ok(disk.get_attr(&name, GptInstance::Primary, attr)?)
    }

    /// The slot the system booted from: the kernel cmdline's `slot_suffix`
    /// when present and well-formed, the on-disk active slot otherwise.
    /// Non-A/B devices are always slot 0.
    pub fn current_slot(&self) -> Slot {
        if self.slot_count() <= 1 {
            return Slot::A;
        }
        if let Some(value) = cmdline::cmdline_value(&self.cmdline_path, SLOT_SUFFIX_PROP) {
            for slot in Slot::ALL {
                if value == slot.suffix() {
                    return slot;
                }
            }
        }
        self.active_slot()
    }

    /// The slot whose boot partition carries the active flag; slot 0 when
    /// none does.
    pub fn active_slot(&self) -> Slot {
        if self.slot_count() <= 1 {
            return Slot::A;
        }
        for slot in Slot::ALL {
            if let Ok(true) = self.boot_attr(slot, AbAttr::SlotActive) {
                return slot;
            }
        }
        Slot::A
    }

    pub fn is_slot_bootable(&self, slot: Slot) -> CtlResult<bool> {
        self.check_slot(slot)?;
        Ok(!self.boot_attr(slot, AbAttr::Unbootable)?)
    }

    pub fn is_slot_marked_successful(&self, slot: Slot) -> CtlResult<bool> {
        self.check_slot(slot)?;
        self.boot_attr(slot, AbAttr::BootSuccessful)
    }

    /// Suffix for a raw slot index. Unlike the other slot queries this never
    /// errors: an out-of-range index yields the empty string.
    pub fn get_suffix(&self, index: u32) -> &'static str {
        suffix_for_index(index)
    }

    /// Unique GUID of the slot's boot partition.
    pub fn boot_guid(&self, slot: Slot) -> CtlResult<[u8; 16]> {
        self.check_slot(slot)?;
        let name = Self::boot_partition(slot);
        let dev = self.resolver.resolve(&name)?;
        let mut io = DevBlockIO::open(&dev, false)?;
        let disk = GptDisk::load(&mut io)?;
        Ok(disk.unique_guid(&name)?)
    }

    /// State triple for both slots, for the status dump.
    pub fn slot_info(&self) -> CtlResult<[SlotInfo; 2]> {
        let active = self.active_slot();
        let mut infos = [SlotInfo::default(); 2];
        for slot in Slot::ALL {
            let info = &mut infos[slot.index() as usize];
            info.active = slot == active;
            info.successful = self.is_slot_marked_successful(slot)?;
            info.bootable = self.is_slot_bootable(slot)?;
        }
        Ok(infos)
    }

    /// The fixed-list bases whose `_a` and `_b` labels are both present.
    /// The boot and dtbo pairs are mandatory; anything else that is absent
    /// is simply not part of this device.
    fn present_pairs(&self) -> CtlResult<Vec<&'static str>> {
        for base in REQUIRED_PTNS {
            for suffix in SLOT_SUFFIXES {
                let name = format!("{base}{suffix}");
                if !self.resolver.exists(&name) {
                    return Err(CtlError::Missing(name));
                }
            }
        }
        Ok(AB_PARTITION_LIST
            .iter()
            .copied()
            .filter(|base| {
                SLOT_SUFFIXES
                    .iter()
                    .all(|suffix| self.resolver.exists(&format!("{base}{suffix}")))
            })
            .collect())
    }

    /// Applies `apply` to every present pair, one commit per hosting disk.
    fn mutate_pairs<F>(&self, mut apply: F) -> CtlResult<()>
    where
        F: FnMut(&mut GptDisk, &str) -> CtlResult<()>,
    {
        let pairs = self.present_pairs()?;
        let groups = self
            .resolver
            .group(pairs.iter().map(|base| format!("{base}{}", Slot::A.suffix())));
        for (dev, names) in groups {
            log_verbose!("updating GPT on {}", dev.display());
            let mut io = DevBlockIO::open(&dev, true)?;
            let mut disk = GptDisk::load(&mut io)?;
            for name in &names {
                let base = name.strip_suffix(Slot::A.suffix()).unwrap_or(name);
                apply(&mut disk, base)?;
            }
            disk.commit(&mut io)?;
        }
        Ok(())
    }

    /// Makes `slot` the one the bootloader tries first.
    ///
    /// Per pair: the unique GUIDs are re-seated, the target entry gets the
    /// active flag and a full priority nibble, the other side is cleared.
    /// `bootable`/`successful` are left alone. On UFS platforms the boot
    /// LUN is switched after all disks have committed.
    pub fn set_active_boot_slot(&mut self, slot: Slot) -> CtlResult<()> {
        self.check_slot(slot)?;
        log_info!("marking slot {} as active", slot.suffix());
        self.mutate_pairs(|disk, base| activate_pair(disk, base, slot))?;

        let xbl_a = format!("{PTN_XBL}{}", Slot::A.suffix());
        if self.resolver.is_backed_by_emmc(&xbl_a, &self.emmc_dev) {
            // eMMC boots from a fixed partition; nothing to switch.
            return Ok(());
        }
        match self.lun_switch.set_boot_lun(BootChain::from(slot)) {
            Err(UfsError::Missing) if self.ignore_missing_bsg => {
                log_info!("UFS bsg node not present, skipping boot LUN switch");
                Ok(())
            }
            Err(e) => Err(CtlError::Ufs(e)),
            Ok(()) => Ok(()),
        }
    }

    /// Sets the unbootable flag on `slot` across every present pair.
    pub fn set_slot_as_unbootable(&mut self, slot: Slot) -> CtlResult<()> {
        self.check_slot(slot)?;
        log_info!("marking slot {} as unbootable", slot.suffix());
        let suffix = slot.suffix();
        self.mutate_pairs(|disk, base| {
            disk.set_attr(&format!("{base}{suffix}"), AbAttr::Unbootable, true)?;
            Ok(())
        })
    }

    /// Records a successful boot of `slot`. An unbootable flag left behind
    /// by a failed update is cleared first.
    pub fn mark_boot_successful(&mut self, slot: Slot) -> CtlResult<()> {
        self.check_slot(slot)?;
        let repair = !self.is_slot_bootable(slot)?;
        if repair {
            log_info!(
                "slot {}: was marked unbootable, clearing the flag",
                slot.suffix()
            );
        }
        let already = self.is_slot_marked_successful(slot)?;
        if already && !repair {
            log_info!("slot {}: already marked successful", slot.suffix());
            return Ok(());
        }

        let suffix = slot.suffix();
        self.mutate_pairs(|disk, base| {
            let name = format!("{base}{suffix}");
            if repair {
                disk.set_attr(&name, AbAttr::Unbootable, false)?;
            }
            disk.set_attr(&name, AbAttr::BootSuccessful, true)?;
            Ok(())
        })
    }
}

impl Default for SlotCtl {
    fn default() -> Self {
        Self::new()
    }
}

/// Flips one A/B pair to `slot` on an already-loaded disk.
fn activate_pair(disk: &mut GptDisk, base: &str, slot: Slot) -> CtlResult<()> {
    let target = format!("{base}{}", slot.suffix());
    let other = format!("{base}{}", slot.other().suffix());

    let target_active = disk.get_attr(&target, GptInstance::Primary, AbAttr::SlotActive)?;
    let other_active = disk.get_attr(&other, GptInstance::Primary, AbAttr::SlotActive)?;
    if !target_active && !other_active {
        return Err(CtlError::Invariant(
            "neither slot of the pair is marked active",
        ));
    }

    disk.swap_guids(&target, &other)?;
    disk.set_attr(&target, AbAttr::SlotActive, true)?;
    disk.set_attr(&other, AbAttr::SlotActive, false)?;
    Ok(())
}
