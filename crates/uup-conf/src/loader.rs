//! Configuration file reading.
//!
//! A loader produces one decoded text: gzip is sniffed and unwrapped,
//! `#include <relative-path>` lines are expanded in place (relative to
//! the including file), comment and blank lines are dropped, and an md5
//! digest of the decoded result is kept for content-based reload
//! invalidation.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::trace;

use crate::error::{ConfError, Result};

const MAX_INCLUDE_DEPTH: usize = 8;

pub struct ConfLoader {
    path: PathBuf,
    text: String,
    digest: [u8; 16],
}

impl ConfLoader {
    pub fn open(path: &Path) -> Result<Self> {
        let text = read_expanded(path, 0)?;
        let digest = md5::compute(&text).0;
        trace!(path = %path.display(), bytes = text.len(), "loaded configuration file");

        Ok(Self { path: path.to_path_buf(), text, digest })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// md5 of the decoded, include-expanded text. Reloads compare this,
    /// so touching a file without changing bytes is a no-op and an
    /// included file's change propagates to its includer.
    pub fn digest(&self) -> [u8; 16] {
        self.digest
    }
}

fn read_decoded(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path).map_err(|source| ConfError::Io { path: path.to_path_buf(), source })?;

    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(&raw[..])
            .read_to_end(&mut out)
            .map_err(|source| ConfError::Io { path: path.to_path_buf(), source })?;
        return Ok(out);
    }

    Ok(raw)
}

fn read_expanded(path: &Path, depth: usize) -> Result<String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConfError::IncludeDepth { path: path.to_path_buf() });
    }

    let bytes = read_decoded(path)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ConfError::Encoding { path: path.to_path_buf() })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.trim_start();

        if let Some(rel) = trimmed.strip_prefix("#include") {
            let rel = rel.trim().trim_start_matches('<').trim_end_matches('>').trim();
            let included = read_expanded(&dir.join(rel), depth + 1)?;
            out.push_str(&included);

            if !included.ends_with('\n') && !included.is_empty() {
                out.push('\n');
            }

            continue;
        }

        if trimmed.starts_with('#') {
            continue;
        }

        out.push_str(line);
        out.push('\n');
    }

    Ok(out)
}
