//! Shared primitives used across Hylytool crates.

use core::fmt;

/// Result alias used across the workspace.
pub type HlResult<T> = Result<T, HlError>;

/// Top-level error type shared by the document, storage and engine crates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlError {
    pub code: &'static str,
    pub message: String,
}

impl HlError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for HlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for HlError {}
