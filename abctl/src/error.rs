// SPDX-License-Identifier: MIT

use core::fmt;

use crate::ufs::UfsError;
use abgpt::GptError;
use abio::error::BlockIOError;

/// Error kinds surfaced by the slot engine.
#[derive(Debug, Clone)]
pub enum CtlError {
    /// Failure opening, reading, writing or syncing a device or file.
    IO(BlockIOError),
    /// Malformed or inconsistent GPT, or an entry lookup that the
    /// pair-exists precheck should have ruled out.
    Gpt(GptError),
    /// Slot out of range or an otherwise unusable argument.
    InvalidArgument(&'static str),
    /// A required partition is absent from the label directory.
    Missing(String),
    /// Neither side of an A/B pair currently carries the active flag.
    Invariant(&'static str),
    /// The UFS boot-LUN switch failed.
    Ufs(UfsError),
}

impl fmt::Display for CtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtlError::IO(e) => write!(f, "I/O error: {e}"),
            CtlError::Gpt(e) => write!(f, "GPT error: {e}"),
            CtlError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            CtlError::Missing(name) => write!(f, "required partition '{name}' is missing"),
            CtlError::Invariant(msg) => write!(f, "invariant violated: {msg}"),
            CtlError::Ufs(e) => write!(f, "boot LUN switch failed: {e}"),
        }
    }
}

impl std::error::Error for CtlError {}

impl From<BlockIOError> for CtlError {
    fn from(e: BlockIOError) -> Self {
        CtlError::IO(e)
    }
}

impl From<GptError> for CtlError {
    fn from(e: GptError) -> Self {
        // IO failures inside the GPT engine are still IO failures.
        match e {
            GptError::IO(io) => CtlError::IO(io),
            other => CtlError::Gpt(other),
        }
    }
}

impl From<UfsError> for CtlError {
    fn from(e: UfsError) -> Self {
        CtlError::Ufs(e)
    }
}

pub type CtlResult<T = ()> = Result<T, CtlError>;
