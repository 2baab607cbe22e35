// SPDX-License-Identifier: MIT

use std::fs::{File, OpenOptions};
use std::os::raw::c_int;
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::{BlockIO, BlockIOError, BlockIOResult};

/// Logical block size assumed for plain image files, where the kernel has no
/// notion of a sector.
const IMAGE_BLOCK_SIZE: u32 = 512;

// Unsafe ioctl wrappers for the block layer.
#[allow(clippy::missing_safety_doc)]
mod ioctl {
    use super::c_int;
    use nix::{ioctl_read, ioctl_read_bad, request_code_none};
    ioctl_read_bad!(blksszget, request_code_none!(0x12, 104), c_int);
    ioctl_read!(blkgetsize64, 0x12, 114, libc::size_t);
}

/// `BlockIO` over a Linux block device node or a plain disk-image file.
///
/// For real block devices the logical block size and byte length come from
/// the kernel (`BLKSSZGET` / `BLKGETSIZE64`); image files report 512-byte
/// blocks and their file length.
#[derive(Debug)]
pub struct DevBlockIO {
    file: File,
    block_size: u32,
    len: u64,
}

impl DevBlockIO {
    /// Opens `path` read-only or read-write and queries its geometry.
    pub fn open(path: &Path, rw: bool) -> BlockIOResult<Self> {
        let file = OpenOptions::new().read(true).write(rw).open(path)?;
        let meta = file.metadata()?;

        let (block_size, len) = if meta.file_type().is_block_device() {
            let fd = file.as_raw_fd();
            let mut bs: c_int = 0;
            unsafe { ioctl::blksszget(fd, &mut bs) }
                .map_err(|_| BlockIOError::Device("BLKSSZGET failed"))?;
            if bs <= 0 {
                return Err(BlockIOError::Device("kernel reported zero block size"));
            }
            let mut size: libc::size_t = 0;
            unsafe { ioctl::blkgetsize64(fd, &mut size) }
                .map_err(|_| BlockIOError::Device("BLKGETSIZE64 failed"))?;
            (bs as u32, size as u64)
        } else {
            (IMAGE_BLOCK_SIZE, meta.len())
        };

        Ok(Self {
            file,
            block_size,
            len,
        })
    }
}

impl BlockIO for DevBlockIO {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    fn flush(&mut self) -> BlockIOResult {
        self.file.sync_all()?;
        Ok(())
    }

    #[inline]
    fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    fn block_size(&self) -> u32 {
        self.block_size
    }
}
