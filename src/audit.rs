//! Append-only log of refused same-source merges.
//!
//! Each line is `main_id,dupe_id`. Operators review the file and feed pairs
//! that really are duplicates back through
//! [`fix_errors`](crate::correction::fix_errors).

use crate::{MergeError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends all pairs in one write. An empty batch does not touch the file.
    pub fn append_pairs<'a>(&self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<()> {
        let lines: String = pairs
            .into_iter()
            .map(|(main, dupe)| format!("{main},{dupe}\n"))
            .collect();
        if lines.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.error(err))?;
        file.write_all(lines.as_bytes()).map_err(|err| self.error(err))?;
        tracing::info!(path = %self.path.display(), "recorded prevented same-source merges");
        Ok(())
    }

    fn error(&self, err: std::io::Error) -> MergeError {
        MergeError::Persistence(format!("{}: {err}", self.path.display()))
    }
}
