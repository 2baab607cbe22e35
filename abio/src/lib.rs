// SPDX-License-Identifier: MIT

// === Core modules ===
pub mod error;

// === Backend modules ===
mod dev;
mod mem;

// === Prelude re-exports (central entrypoint) ===
pub mod prelude {
    pub use super::dev::DevBlockIO;
    pub use super::error::*;
    pub use super::mem::MemBlockIO;
    pub use super::BlockIO;
    pub use super::BlockIOStructExt;
}

use error::*;

/// Maximum size of the internal scratch buffer used by struct reads.
const STRUCT_BUF_SIZE: usize = 1024;

/// Block IO abstraction trait.
///
/// Absolute-offset, full-length reads and writes against a byte-addressable
/// device. Short reads and short writes are errors, never partial results.
/// Implementations may target block devices, plain image files or RAM.
pub trait BlockIO {
    /// Reads `buf.len()` bytes into `buf` from `offset` (absolute).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult;

    /// Writes `data` at `offset` (absolute).
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult;

    /// Flushes written data down to the device (may be a no-op for RAM).
    fn flush(&mut self) -> BlockIOResult;

    /// Byte length of the device.
    fn len(&self) -> u64;

    /// Logical block size of the device in bytes.
    fn block_size(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extension trait for reading and writing structs using zerocopy.
///
/// Requires the struct to implement zerocopy traits for safe conversion.
pub trait BlockIOStructExt: BlockIO {
    /// Reads a struct of type `T` from the given offset.
    fn read_struct<T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
    ) -> BlockIOResult<T> {
        let size = core::mem::size_of::<T>();
        assert!(size <= STRUCT_BUF_SIZE, "read_struct: type too large");
        let mut buf = [0u8; STRUCT_BUF_SIZE];
        self.read_at(offset, &mut buf[..size])?;
        T::read_from_bytes(&buf[..size]).map_err(|_| BlockIOError::Device("read_struct failed"))
    }

    /// Writes a struct of type `T` at the given offset.
    fn write_struct<T: zerocopy::IntoBytes + zerocopy::KnownLayout + zerocopy::Immutable>(
        &mut self,
        offset: u64,
        val: &T,
    ) -> BlockIOResult {
        self.write_at(offset, val.as_bytes())
    }
}

impl<T: BlockIO + ?Sized> BlockIOStructExt for T {}
