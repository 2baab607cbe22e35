// SPDX-License-Identifier: MIT

use core::fmt;

use abio::error::BlockIOError;

/// Unified error type for the GPT engine.
#[derive(Debug, Clone)]
pub enum GptError {
    IO(BlockIOError),
    Invalid(&'static str),
    NotFound,
}

impl GptError {
    pub fn msg(&self) -> &'static str {
        match self {
            GptError::IO(e) => e.msg(),
            GptError::Invalid(msg) => msg,
            GptError::NotFound => "No such partition entry",
        }
    }
}

impl From<BlockIOError> for GptError {
    fn from(e: BlockIOError) -> Self {
        GptError::IO(e)
    }
}

impl fmt::Display for GptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())
    }
}

impl std::error::Error for GptError {}

pub type GptResult<T = ()> = Result<T, GptError>;
