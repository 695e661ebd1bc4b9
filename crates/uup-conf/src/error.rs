//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: include depth limit exceeded")]
    IncludeDepth { path: PathBuf },

    #[error("{path}: file is not valid UTF-8")]
    Encoding { path: PathBuf },

    #[error("Attempted to re-register {name}")]
    DuplicateModule { name: String },

    #[error("Attempted to register {name} without a %u part")]
    PatternNeedsOrg { name: String },

    #[error("{path}: {line}: {what}")]
    Parse { path: String, line: u32, what: String },

    #[error(transparent)]
    Prefs(#[from] uup_prefs::PrefsError),

    #[error(transparent)]
    List(#[from] uup_lists::ListError),
}

impl ConfError {
    pub fn parse(path: &str, line: u32, what: impl Into<String>) -> Self {
        Self::Parse { path: path.to_string(), line, what: what.into() }
    }
}

pub type Result<T> = std::result::Result<T, ConfError>;
