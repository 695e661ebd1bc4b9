//! Error types for primitive list construction

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ListError {
    #[error("Invalid domain character (0x{byte:02x}) found (offset {offset})")]
    InvalidDomainByte { offset: usize, byte: u8 },

    #[error("Invalid embedded whitespace found (offset {offset}) on a single line")]
    EmbeddedWhitespace { offset: usize },

    #[error("Cannot load a list with no entries")]
    EmptyList,

    #[error("Invalid fingerprint; length should be {expected}, not {got}")]
    FingerprintWidth { expected: usize, got: usize },

    #[error("Offset {offset}: URL was truncated during normalization")]
    UrlTruncated { offset: usize },

    #[error("Offset {offset}: URL failed to normalize")]
    UrlNormalize { offset: usize },

    #[error("Offset {offset}: Only one url may be present per line")]
    OneUrlPerLine { offset: usize },

    #[error("Failed to parse address at '{text}'")]
    BadAddress { text: String },

    #[error("Failed to parse id at '{text}'")]
    BadId { text: String },
}

pub type Result<T> = std::result::Result<T, ListError>;
