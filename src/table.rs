//! Table access seam.
//!
//! The core never parses an SST file itself; it addresses tables by number
//! and size through this trait. The block format, cache eviction and filter
//! handling all live behind it.

use crate::error::Result;

/// An entry stream in internal-key order.
pub type EntryIter = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + Send>;

pub trait TableCache: Send + Sync {
    /// Point lookup: the first entry at or after `internal_key` in the
    /// table, or `None` when the table holds nothing at or after it.
    fn seek(
        &self,
        file_number: u64,
        file_size: u64,
        internal_key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Full scan of the table in internal-key order.
    fn iter(&self, file_number: u64, file_size: u64) -> Result<EntryIter>;
}
