// SPDX-License-Identifier: MIT

//! UFS boot-LUN switch.
//!
//! UFS boot partitions cannot carry a backup GPT, so which XBL copy the boot
//! ROM loads is selected out of band: a UPIU query writes the bBootLunEn
//! attribute through the kernel's ufs-bsg node. eMMC platforms never take
//! this path.

use core::fmt;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::slots::Slot;

pub const DEFAULT_UFS_BSG_DEV: &str = "/dev/bsg/ufs-bsg0";

const BOOT_LUN_A_ID: u8 = 1;
const BOOT_LUN_B_ID: u8 = 2;

// UPIU query request framing (JESD220 subset used here).
const UPIU_TRANSACTION_QUERY_REQ: u8 = 0x16;
const UPIU_QUERY_FUNC_STD_WRITE: u8 = 0x81;
const UPIU_QUERY_OP_WRITE_ATTR: u8 = 0x04;
const QUERY_ATTR_IDN_BOOT_LU_EN: u8 = 0x02;

// sg_io_v4 framing.
const SG_IO_V4_GUARD: i32 = b'Q' as i32;
const BSG_PROTOCOL_SCSI: u32 = 4;
const BSG_SUB_PROTOCOL_SCSI_TRANSPORT: u32 = 2;

#[allow(clippy::missing_safety_doc)]
mod ioctl {
    use super::SgIoV4;
    use nix::ioctl_readwrite_bad;
    ioctl_readwrite_bad!(sg_io_v4, 0x2285, SgIoV4);
}

/// Which side the bootloader is instructed to boot from at the LUN level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BootChain {
    NormalBoot,
    BackupBoot,
}

impl BootChain {
    /// bBootLunEn value for this chain.
    #[inline]
    pub fn lun_id(self) -> u8 {
        match self {
            BootChain::NormalBoot => BOOT_LUN_A_ID,
            BootChain::BackupBoot => BOOT_LUN_B_ID,
        }
    }
}

impl From<Slot> for BootChain {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::A => BootChain::NormalBoot,
            Slot::B => BootChain::BackupBoot,
        }
    }
}

#[derive(Debug, Clone)]
pub enum UfsError {
    /// The bsg node does not exist (CONFIG_SCSI_UFS_BSG disabled, or not a
    /// UFS platform after all).
    Missing,
    Open(&'static str),
    Transport(&'static str),
    /// The HBA accepted the ioctl but rejected the query.
    DeviceStatus { result: i32 },
}

impl fmt::Display for UfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UfsError::Missing => write!(f, "UFS bsg node not present"),
            UfsError::Open(msg) => write!(f, "cannot open UFS bsg node: {msg}"),
            UfsError::Transport(msg) => write!(f, "{msg}"),
            UfsError::DeviceStatus { result } => {
                write!(f, "UFS query rejected by the device (result {result})")
            }
        }
    }
}

impl std::error::Error for UfsError {}

/// Seam between the slot engine and the UFS transport; tests substitute a
/// recording fake.
pub trait BootLunSwitch {
    fn set_boot_lun(&mut self, chain: BootChain) -> Result<(), UfsError>;
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone)]
#[repr(C)]
struct UpiuHeader {
    transaction_type: u8,
    flags: u8,
    lun: u8,
    task_tag: u8,
    initiator_id: u8,
    function: u8,
    response: u8,
    status: u8,
    ehs_length: u8,
    device_info: u8,
    data_segment_len: U16<BigEndian>,
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone)]
#[repr(C)]
struct UpiuQuery {
    opcode: u8,
    idn: u8,
    index: u8,
    selector: u8,
    reserved_osf: [u8; 2],
    length: U16<BigEndian>,
    value: U32<BigEndian>,
    reserved: [u8; 8],
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone)]
#[repr(C)]
struct UfsBsgRequest {
    msgcode: u32,
    header: UpiuHeader,
    qr: UpiuQuery,
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone)]
#[repr(C)]
struct UfsBsgReply {
    result: i32,
    reply_payload_rcv_len: u32,
    header: UpiuHeader,
    qr: UpiuQuery,
}

/// `struct sg_io_v4` from `<linux/bsg.h>`.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone)]
#[repr(C)]
struct SgIoV4 {
    guard: i32,
    protocol: u32,
    subprotocol: u32,
    request_len: u32,
    request: u64,
    request_tag: u64,
    request_attr: u32,
    request_priority: u32,
    request_extra: u32,
    max_response_len: u32,
    response: u64,
    dout_iovec_count: u32,
    dout_xfer_len: u32,
    din_iovec_count: u32,
    din_xfer_len: u32,
    dout_xferp: u64,
    din_xferp: u64,
    timeout: u32,
    flags: u32,
    usr_ptr: u64,
    spare_in: u32,
    driver_status: u32,
    transport_status: u32,
    device_status: u32,
    retry_delay: u32,
    info: u32,
    duration: u32,
    response_len: u32,
    din_resid: i32,
    dout_resid: i32,
    generated_tag: u64,
    spare_out: u32,
    padding: u32,
}

/// The real transport: one query-write per call, node opened and closed
/// around it.
#[derive(Debug, Clone)]
pub struct UfsBsg {
    node: PathBuf,
}

impl UfsBsg {
    pub fn new() -> Self {
        Self {
            node: DEFAULT_UFS_BSG_DEV.into(),
        }
    }

    pub fn at(node: impl Into<PathBuf>) -> Self {
        Self { node: node.into() }
    }
}

impl Default for UfsBsg {
    fn default() -> Self {
        Self::new()
    }
}

impl BootLunSwitch for UfsBsg {
    fn set_boot_lun(&mut self, chain: BootChain) -> Result<(), UfsError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.node)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => UfsError::Missing,
                _ => UfsError::Open(Box::leak(e.to_string().into_boxed_str())),
            })?;

        let mut req = UfsBsgRequest::new_zeroed();
        req.msgcode = UPIU_TRANSACTION_QUERY_REQ as u32;
        req.header.transaction_type = UPIU_TRANSACTION_QUERY_REQ;
        req.header.function = UPIU_QUERY_FUNC_STD_WRITE;
        req.qr.opcode = UPIU_QUERY_OP_WRITE_ATTR;
        req.qr.idn = QUERY_ATTR_IDN_BOOT_LU_EN;
        req.qr.value = U32::new(chain.lun_id() as u32);

        let mut rsp = UfsBsgReply::new_zeroed();
        let mut sg = SgIoV4::new_zeroed();
        sg.guard = SG_IO_V4_GUARD;
        sg.protocol = BSG_PROTOCOL_SCSI;
        sg.subprotocol = BSG_SUB_PROTOCOL_SCSI_TRANSPORT;
        sg.request_len = core::mem::size_of::<UfsBsgRequest>() as u32;
        sg.request = &req as *const UfsBsgRequest as u64;
        sg.max_response_len = core::mem::size_of::<UfsBsgReply>() as u32;
        sg.response = &mut rsp as *mut UfsBsgReply as u64;
        // An attribute write carries no data payload; both transfer
        // directions stay empty.

        unsafe { ioctl::sg_io_v4(file.as_raw_fd(), &mut sg) }
            .map_err(|_| UfsError::Transport("SG_IO ioctl failed"))?;

        if sg.info != 0 || rsp.result != 0 {
            return Err(UfsError::DeviceStatus { result: rsp.result });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_struct_sizes() {
        // Fixed by the kernel ABI.
        assert_eq!(core::mem::size_of::<UpiuHeader>(), 12);
        assert_eq!(core::mem::size_of::<UpiuQuery>(), 20);
        assert_eq!(core::mem::size_of::<UfsBsgRequest>(), 36);
        assert_eq!(core::mem::size_of::<UfsBsgReply>(), 40);
        assert_eq!(core::mem::size_of::<SgIoV4>(), 160);
    }

    #[test]
    fn lun_assignment_is_fixed() {
        assert_eq!(BootChain::from(Slot::A).lun_id(), 1);
        assert_eq!(BootChain::from(Slot::B).lun_id(), 2);
    }

    #[test]
    fn query_value_is_big_endian() {
        let mut req = UfsBsgRequest::new_zeroed();
        req.qr.value = U32::new(2);
        let bytes = req.qr.value.as_bytes();
        assert_eq!(bytes, [0, 0, 0, 2]);
    }

    #[test]
    fn missing_node_maps_to_missing() {
        let mut ufs = UfsBsg::at("/nonexistent/bsg/ufs-bsg0");
        assert!(matches!(
            ufs.set_boot_lun(BootChain::NormalBoot),
            Err(UfsError::Missing)
        ));
    }
}
