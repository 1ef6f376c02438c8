//! The MANIFEST: a durable log of version edits.
//!
//! While the write-ahead log protects user data, the manifest protects the
//! database's structure. Every atomic transition of the file set is appended
//! here as an encoded [`edit::VersionEdit`]; replaying the log from the
//! start reconstructs the current version exactly. The `CURRENT` file names
//! the manifest in effect, and a freshly created manifest always begins
//! with a snapshot edit describing the entire state at creation time.

pub mod edit;
pub mod record;

use std::path::Path;

use edit::VersionEdit;

use crate::env::Env;
use crate::error::Result;

/// Append side of the active MANIFEST.
pub struct Manifest {
    log: record::Writer,
}

impl Manifest {
    /// Create a fresh manifest file, truncating anything in the way.
    pub fn create(env: &dyn Env, path: &Path) -> Result<Self> {
        Ok(Self {
            log: record::Writer::new(env.create(path)?),
        })
    }

    /// Reopen an existing manifest to keep appending to it.
    pub fn reuse(env: &dyn Env, path: &Path) -> Result<Self> {
        let length = env.file_size(path)?;
        Ok(Self {
            log: record::Writer::with_initial_length(env.append(path)?, length),
        })
    }

    pub fn append_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        self.log.add_record(&edit.encode())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.log.sync()
    }

    /// Open a manifest for replay.
    pub fn edits(env: &dyn Env, path: &Path) -> Result<EditReader> {
        Ok(EditReader {
            log: record::Reader::new(env.open(path)?),
        })
    }
}

/// Iterates the edits of a manifest in write order.
pub struct EditReader {
    log: record::Reader,
}

impl Iterator for EditReader {
    type Item = Result<VersionEdit>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.log.read_record() {
            Ok(Some(data)) => Some(VersionEdit::decode(&data)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
