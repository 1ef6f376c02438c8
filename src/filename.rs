//! Database file naming.
//!
//! Every file in the database directory is named by its number:
//!
//! ```text
//! 000042.sst        table file
//! 000007.log        write-ahead log (owned by the caller)
//! MANIFEST-000005   descriptor log of version edits
//! CURRENT           single line naming the live MANIFEST
//! 000009.dbtmp      scratch file, always safe to delete
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::corruption;
use crate::env::Env;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Log,
    Table,
    Descriptor,
    Current,
    Temp,
}

pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.log"))
}

pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.sst"))
}

pub fn descriptor_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub fn temp_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.dbtmp"))
}

/// Classifies a file name within the database directory. Returns `None` for
/// names the database does not own.
pub fn parse_file_name(name: &str) -> Option<(FileKind, u64)> {
    if name == "CURRENT" {
        return Some((FileKind::Current, 0));
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return rest.parse().ok().map(|n| (FileKind::Descriptor, n));
    }
    let (stem, suffix) = name.split_once('.')?;
    let number: u64 = stem.parse().ok()?;
    match suffix {
        "log" => Some((FileKind::Log, number)),
        "sst" => Some((FileKind::Table, number)),
        "dbtmp" => Some((FileKind::Temp, number)),
        _ => None,
    }
}

/// Points CURRENT at the given descriptor, atomically: the new content is
/// written and synced to a temp file, then renamed over CURRENT.
pub fn set_current_file(env: &dyn Env, dir: &Path, descriptor_number: u64) -> Result<()> {
    let contents = format!("MANIFEST-{descriptor_number:06}\n");
    let tmp = temp_file_name(dir, descriptor_number);
    let result = (|| {
        let mut file = env.create(&tmp)?;
        file.append(contents.as_bytes())?;
        file.sync()?;
        env.rename(&tmp, &current_file_name(dir))
    })();
    if result.is_err() {
        let _ = env.remove(&tmp);
    }
    result
}

/// Reads CURRENT and returns the descriptor file name it points at.
pub fn read_current_file(env: &dyn Env, dir: &Path) -> Result<String> {
    let path = current_file_name(dir);
    if !env.exists(&path) {
        return corruption!("CURRENT file is missing in {:?}", dir);
    }
    let mut contents = String::new();
    env.open(&path)?
        .read_to_string(&mut contents)
        .map_err(crate::error::Error::from)?;
    if contents.is_empty() || !contents.ends_with('\n') {
        return corruption!("CURRENT file does not end with newline");
    }
    let name = contents.trim_end_matches('\n').to_string();
    match parse_file_name(&name) {
        Some((FileKind::Descriptor, _)) => Ok(name),
        _ => corruption!("CURRENT names a non-descriptor file: {name:?}"),
    }
}
