//! File-system seam consumed by the core.
//!
//! The core itself only ever appends to the MANIFEST, reads it back on
//! recovery, and swaps the CURRENT pointer file; everything else it does
//! with files is bookkeeping by number. This trait is the whole surface.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::Result;

/// A writable file in append mode.
pub trait AppendFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    /// Flush buffers and force the data to stable storage.
    fn sync(&mut self) -> Result<()>;
}

pub trait Env: Send + Sync {
    /// Create (or truncate) a file for appending.
    fn create(&self, path: &Path) -> Result<Box<dyn AppendFile>>;

    /// Open an existing file for appending, preserving its contents.
    fn append(&self, path: &Path) -> Result<Box<dyn AppendFile>>;

    /// Open an existing file for sequential reading.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;

    fn file_size(&self, path: &Path) -> Result<u64>;

    fn exists(&self, path: &Path) -> bool;
}

/// `Env` over the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskEnv;

struct DiskAppendFile {
    writer: BufWriter<File>,
    file: File,
}

impl AppendFile for DiskAppendFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl DiskEnv {
    fn open_for_append(&self, path: &Path, truncate: bool) -> Result<Box<dyn AppendFile>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(truncate)
            .append(!truncate)
            .write(true)
            .open(path)?;
        let writer = BufWriter::new(file.try_clone()?);
        Ok(Box::new(DiskAppendFile { writer, file }))
    }
}

impl Env for DiskEnv {
    fn create(&self, path: &Path) -> Result<Box<dyn AppendFile>> {
        self.open_for_append(path, true)
    }

    fn append(&self, path: &Path) -> Result<Box<dyn AppendFile>> {
        self.open_for_append(path, false)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
