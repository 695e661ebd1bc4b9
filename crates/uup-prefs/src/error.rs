//! Error types for preference parsing and assembly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("{path}: {line}: {what}")]
    Parse { path: String, line: u32, what: String },

    #[error("Out-of-order or duplicate {section} entry")]
    Unordered { section: &'static str },

    #[error("List type {ltype:02X} is not compatible with elementtype {elementtype}")]
    Incompatible { ltype: u8, elementtype: &'static str },

    #[error("List type {ltype:02X} requires an empty category bit")]
    BitNotEmpty { ltype: u8 },

    #[error("Section {section} exceeds its allocation of {alloc}")]
    Overfull { section: &'static str, alloc: usize },

    #[error("Cannot add identity; invalid bundleid or orgid")]
    BadIdentity,

    #[error(transparent)]
    List(#[from] uup_lists::ListError),
}

impl PrefsError {
    pub fn parse(path: &str, line: u32, what: impl Into<String>) -> Self {
        Self::Parse { path: path.to_string(), line, what: what.into() }
    }
}

pub type Result<T> = std::result::Result<T, PrefsError>;
