// SPDX-License-Identifier: MIT

use core::fmt;

/// Result type for block IO operations.
pub type BlockIOResult<T = ()> = core::result::Result<T, BlockIOError>;

/// Error type for block IO operations.
#[derive(Debug, Clone)]
pub enum BlockIOError {
    /// Underlying device or file I/O error.
    Device(&'static str),

    /// Attempted to read or write past the end of the device.
    OutOfBounds,

    /// Operation not supported by this backend.
    Unsupported,
}

impl BlockIOError {
    pub fn msg(&self) -> &'static str {
        match self {
            BlockIOError::Device(msg) => msg,
            BlockIOError::OutOfBounds => "Out of bounds",
            BlockIOError::Unsupported => "Unsupported operation",
        }
    }
}

impl fmt::Display for BlockIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())
    }
}

impl std::error::Error for BlockIOError {}

impl From<std::io::Error> for BlockIOError {
    #[cold]
    #[inline(never)]
    fn from(e: std::io::Error) -> Self {
        // Leak the string to produce a 'static str. Acceptable for error mapping.
        let leaked_str: &'static str = Box::leak(e.to_string().into_boxed_str());
        BlockIOError::Device(leaked_str)
    }
}
