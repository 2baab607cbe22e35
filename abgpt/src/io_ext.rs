// SPDX-License-Identifier: MIT

//! LBA-aware `BlockIO` helpers to avoid `* block_size` everywhere, with
//! overflow checks and `read/write_struct` versions on LBA.

use abio::error::{BlockIOError, BlockIOResult};
use abio::prelude::*;

/// Offset = LBA * block_size (with overflow check)
#[inline]
fn lba_offset(lba: u64, block_size: u64) -> BlockIOResult<u64> {
    lba.checked_mul(block_size).ok_or(BlockIOError::OutOfBounds)
}

/// LBA-aligned read/write helpers.
pub trait BlockIOLbaExt: BlockIO {
    /// Reads `buf.len()` bytes starting from an LBA.
    #[inline]
    fn read_at_lba(&mut self, lba: u64, block_size: u64, buf: &mut [u8]) -> BlockIOResult {
        let off = lba_offset(lba, block_size)?;
        self.read_at(off, buf)
    }

    /// Writes `data.len()` bytes starting from an LBA.
    #[inline]
    fn write_at_lba(&mut self, lba: u64, block_size: u64, data: &[u8]) -> BlockIOResult {
        let off = lba_offset(lba, block_size)?;
        self.write_at(off, data)
    }

    /// Reads a struct `T` starting from an LBA.
    #[inline]
    fn read_struct_lba<T>(&mut self, lba: u64, block_size: u64) -> BlockIOResult<T>
    where
        T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        let off = lba_offset(lba, block_size)?;
        self.read_struct::<T>(off)
    }

    /// Writes a struct `T` starting from an LBA.
    #[inline]
    fn write_struct_lba<T>(&mut self, lba: u64, block_size: u64, val: &T) -> BlockIOResult
    where
        T: zerocopy::IntoBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        let off = lba_offset(lba, block_size)?;
        self.write_struct::<T>(off, val)
    }
}

impl<T: BlockIO + ?Sized> BlockIOLbaExt for T {}
