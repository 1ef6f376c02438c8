//! Versions: immutable snapshots of the table files per level.
//!
//! Every state transition of the database produces a fresh `Version`; the
//! newest one is "current". Readers pin a version with an `Arc` and read it
//! without any lock, because a version's file set never changes after it is
//! built. Compactions that retire files only ever produce a *new* version;
//! a pinned one keeps its `FileMetaData` handles (and thereby the right to
//! read the physical files) alive until the last reader lets go.
//!
//! Level 0 files come straight from memtable flushes and may overlap each
//! other; the read path visits them newest file first. Files at level 1 and
//! below are pairwise disjoint and sorted by smallest key, so a point
//! lookup touches at most one file per level.

pub mod compaction;
pub mod set;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::error::Result;
use crate::key::{
    parse_internal_key, InternalKey, InternalKeyComparator, LookupKey, ValueType,
    MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK,
};
use crate::table::{EntryIter, TableCache};

/// Metadata for one table file.
#[derive(Debug)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    /// Smallest internal key served by the file.
    pub smallest: InternalKey,
    /// Largest internal key served by the file.
    pub largest: InternalKey,
    /// Seeks remaining before this file nominates itself for compaction.
    /// One seek is charged per point lookup that had to read the file
    /// without finding its answer there.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        // One seek costs about as much as compacting 16KB, so a file earns
        // one allowed seek per 16KB, floored at 100 so tiny files are not
        // compacted over a handful of misses.
        let allowed_seeks = (file_size as i64 / 16384).max(100);
        Self {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks),
        }
    }
}

/// Sum of the file sizes in `files`.
pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Returns the smallest index whose file's largest key is at or after
/// `key`, or `files.len()` if every file ends before it.
///
/// `files` must be sorted by key range and non-overlapping.
pub fn find_file(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
    key: &[u8],
) -> usize {
    let (mut left, mut right) = (0, files.len());
    while left < right {
        let mid = (left + right) / 2;
        if icmp.compare(files[mid].largest.as_bytes(), key) == Ordering::Less {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    right
}

fn after_file(
    ucmp: &Arc<dyn crate::key::Comparator>,
    user_key: Option<&[u8]>,
    file: &FileMetaData,
) -> bool {
    // A None bound is open: nothing is after it.
    match user_key {
        Some(key) => ucmp.compare(key, file.largest.user_key()) == Ordering::Greater,
        None => false,
    }
}

fn before_file(
    ucmp: &Arc<dyn crate::key::Comparator>,
    user_key: Option<&[u8]>,
    file: &FileMetaData,
) -> bool {
    match user_key {
        Some(key) => ucmp.compare(key, file.smallest.user_key()) == Ordering::Less,
        None => false,
    }
}

/// Does any file in `files` overlap the user-key range
/// `[smallest_user_key, largest_user_key]`? `None` bounds are open ends.
pub fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint_sorted_files: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    let ucmp = icmp.user_comparator();
    if !disjoint_sorted_files {
        // Level 0: check every file.
        return files
            .iter()
            .any(|f| !after_file(ucmp, smallest_user_key, f) && !before_file(ucmp, largest_user_key, f));
    }

    let index = match smallest_user_key {
        Some(key) => {
            let probe = InternalKey::new(key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, probe.as_bytes())
        }
        None => 0,
    };
    if index >= files.len() {
        // Every file ends before the start of the range.
        return false;
    }
    !before_file(ucmp, largest_user_key, &files[index])
}

/// Read statistics from one `Version::get`, fed back through
/// [`Version::update_stats`] to drive seek-triggered compaction.
#[derive(Default)]
pub struct GetStats {
    pub seek_file: Option<(Arc<FileMetaData>, usize)>,
}

enum Found {
    Value(Vec<u8>),
    Deleted,
    NotPresent,
}

/// An immutable snapshot of the file set.
pub struct Version {
    pub(crate) config: Arc<Config>,
    pub(crate) icmp: InternalKeyComparator,
    /// Files per level, sorted by smallest key (file number breaks ties,
    /// which only arise at level 0).
    pub(crate) files: Vec<Vec<Arc<FileMetaData>>>,
    /// File nominated by the seek counter, with its level.
    pub(crate) file_to_compact: RwLock<Option<(Arc<FileMetaData>, usize)>>,
    /// Score >= 1 means the corresponding level is due for compaction.
    /// Both are computed by `VersionSet::finalize` before installation.
    pub(crate) compaction_score: f64,
    pub(crate) compaction_level: usize,
}

impl Version {
    pub(crate) fn new(config: Arc<Config>, icmp: InternalKeyComparator) -> Self {
        let levels = config.num_levels;
        Self {
            config,
            icmp,
            files: vec![Vec::new(); levels],
            file_to_compact: RwLock::new(None),
            compaction_score: -1.0,
            compaction_level: 0,
        }
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// The files at `level`, sorted by smallest key.
    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    /// Look up `key`. On success returns the value, `None` for a missing or
    /// deleted key, and the seek statistics the caller should feed back via
    /// [`Version::update_stats`].
    pub fn get(
        &self,
        cache: &dyn TableCache,
        key: &LookupKey,
    ) -> Result<(Option<Vec<u8>>, GetStats)> {
        let ucmp = self.icmp.user_comparator();
        let user_key = key.user_key();
        let mut stats = GetStats::default();
        let mut last_file_read: Option<(Arc<FileMetaData>, usize)> = None;

        // Level 0 candidates overlap; read them newest file first.
        let mut level0: Vec<&Arc<FileMetaData>> = self.files[0]
            .iter()
            .filter(|f| {
                ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                    && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
            })
            .collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));

        for file in level0 {
            let file = file.clone();
            match self.search_file(cache, &file, 0, key, &mut stats, &mut last_file_read)? {
                Found::Value(value) => return Ok((Some(value), stats)),
                Found::Deleted => return Ok((None, stats)),
                Found::NotPresent => {}
            }
        }

        // Deeper levels are disjoint: at most one candidate each.
        for level in 1..self.config.num_levels {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }
            let index = find_file(&self.icmp, files, key.internal_key());
            if index >= files.len() {
                continue;
            }
            let file = files[index].clone();
            if ucmp.compare(user_key, file.smallest.user_key()) == Ordering::Less {
                continue;
            }
            match self.search_file(cache, &file, level, key, &mut stats, &mut last_file_read)? {
                Found::Value(value) => return Ok((Some(value), stats)),
                Found::Deleted => return Ok((None, stats)),
                Found::NotPresent => {}
            }
        }

        // Nothing answered; charge the first file the lookup had to read.
        if stats.seek_file.is_none() {
            stats.seek_file = last_file_read;
        }
        Ok((None, stats))
    }

    fn search_file(
        &self,
        cache: &dyn TableCache,
        file: &Arc<FileMetaData>,
        level: usize,
        key: &LookupKey,
        stats: &mut GetStats,
        last_file_read: &mut Option<(Arc<FileMetaData>, usize)>,
    ) -> Result<Found> {
        if stats.seek_file.is_none() {
            if let Some(previous) = last_file_read.take() {
                // Second file read for this lookup: the first one is charged.
                stats.seek_file = Some(previous);
            }
        }
        *last_file_read = Some((file.clone(), level));

        let entry = cache.seek(file.number, file.file_size, key.internal_key())?;
        let Some((found_key, value)) = entry else {
            return Ok(Found::NotPresent);
        };
        let (found_user_key, _, value_type) = parse_internal_key(&found_key)?;
        if self
            .icmp
            .user_comparator()
            .compare(found_user_key, key.user_key())
            != Ordering::Equal
        {
            return Ok(Found::NotPresent);
        }
        match value_type {
            ValueType::Value => Ok(Found::Value(value)),
            ValueType::Deletion => Ok(Found::Deleted),
        }
    }

    /// Charge one seek against the file in `stats`. Returns true when the
    /// charge exhausted the file's budget and nominated it, meaning the
    /// caller should consider scheduling a compaction.
    pub fn update_stats(&self, stats: &GetStats) -> bool {
        let Some((file, level)) = &stats.seek_file else {
            return false;
        };
        let remaining = file.allowed_seeks.fetch_sub(1, AtomicOrdering::SeqCst) - 1;
        // Bottom-level files have no level to compact into.
        if remaining <= 0 && level + 1 < self.config.num_levels {
            let mut nominated = self.file_to_compact.write().unwrap();
            if nominated.is_none() {
                tracing::info!(
                    file = file.number,
                    level = *level,
                    "seek budget exhausted, file nominated for compaction"
                );
                *nominated = Some((file.clone(), *level));
                return true;
            }
        }
        false
    }

    /// Account one sampled read at `internal_key`. When at least two files
    /// overlap the key, the newest is charged a seek, exactly as if a `get`
    /// had read it fruitlessly. Returns true if that nominated a file.
    pub fn record_read_sample(&self, internal_key: &[u8]) -> bool {
        let Ok((user_key, _, _)) = parse_internal_key(internal_key) else {
            return false;
        };

        let mut matches = 0;
        let mut first: Option<(Arc<FileMetaData>, usize)> = None;
        self.for_each_overlapping(user_key, |level, file| {
            matches += 1;
            if matches == 1 {
                first = Some((file.clone(), level));
            }
            matches < 2
        });

        if matches >= 2 {
            let stats = GetStats { seek_file: first };
            return self.update_stats(&stats);
        }
        false
    }

    /// Visit every file that may contain `user_key`, newest to oldest,
    /// stopping when `visit` returns false.
    fn for_each_overlapping<F>(&self, user_key: &[u8], mut visit: F)
    where
        F: FnMut(usize, &Arc<FileMetaData>) -> bool,
    {
        let ucmp = self.icmp.user_comparator();

        let mut level0: Vec<&Arc<FileMetaData>> = self.files[0]
            .iter()
            .filter(|f| {
                ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                    && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
            })
            .collect();
        level0.sort_by(|a, b| b.number.cmp(&a.number));
        for file in level0 {
            if !visit(0, file) {
                return;
            }
        }

        let probe = InternalKey::new(user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        for level in 1..self.config.num_levels {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }
            let index = find_file(&self.icmp, files, probe.as_bytes());
            if index >= files.len() {
                continue;
            }
            let file = &files[index];
            if ucmp.compare(user_key, file.smallest.user_key()) == Ordering::Less {
                continue;
            }
            if !visit(level, file) {
                return;
            }
        }
    }

    /// Does any file at `level` overlap `[smallest_user_key, largest_user_key]`?
    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        some_file_overlaps_range(
            &self.icmp,
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Collects the files at `level` overlapping `[begin, end]` (open ends
    /// for `None`). Overlap is judged on user keys. At level 0, where files
    /// overlap each other, any file that widens the range restarts the scan
    /// with the widened range until a fixed point is reached.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());

        let mut inputs = Vec::new();
        let mut i = 0;
        while i < self.files[level].len() {
            let file = self.files[level][i].clone();
            i += 1;
            let file_start = file.smallest.user_key();
            let file_limit = file.largest.user_key();
            if user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue;
            }
            if user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue;
            }
            inputs.push(file.clone());
            if level == 0 {
                if user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less)
                {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater)
                {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Level at which to place a fresh memtable flush covering
    /// `[smallest_user_key, largest_user_key]`. The flush sinks past any
    /// level it does not overlap, as long as the grandparent overlap stays
    /// small enough that a later compaction of it will not balloon.
    pub fn pick_level_for_memtable_output(
        &self,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> usize {
        let mut level = 0;
        if !self.overlap_in_level(0, Some(smallest_user_key), Some(largest_user_key)) {
            let start = InternalKey::new(smallest_user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            let limit = InternalKey::new(largest_user_key, 0, ValueType::Deletion);
            while level < self.config.max_mem_compact_level {
                if self.overlap_in_level(level + 1, Some(smallest_user_key), Some(largest_user_key))
                {
                    break;
                }
                if level + 2 < self.config.num_levels {
                    let overlaps = self.get_overlapping_inputs(level + 2, Some(&start), Some(&limit));
                    if total_file_size(&overlaps) > self.config.max_grandparent_overlap_bytes() {
                        break;
                    }
                }
                level += 1;
            }
        }
        level
    }

    /// One iterator per level-0 file plus one concatenating iterator per
    /// deeper non-empty level; merging them yields this version's contents.
    pub fn iterators(&self, cache: Arc<dyn TableCache>) -> Result<Vec<EntryIter>> {
        let mut iters: Vec<EntryIter> = Vec::new();
        for file in &self.files[0] {
            iters.push(cache.iter(file.number, file.file_size)?);
        }
        for level in 1..self.config.num_levels {
            if !self.files[level].is_empty() {
                iters.push(Box::new(LevelFileIter::new(
                    self.files[level].clone(),
                    cache.clone(),
                )));
            }
        }
        Ok(iters)
    }

    /// Multi-line listing of every file with its key range, for diagnostics.
    pub fn debug_string(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (level, files) in self.files.iter().enumerate() {
            writeln!(out, "--- level {level} ---").unwrap();
            for f in files {
                writeln!(
                    out,
                    "  {}:{} [{:?} .. {:?}]",
                    f.number, f.file_size, f.smallest, f.largest
                )
                .unwrap();
            }
        }
        out
    }
}

/// Streams the entries of a sorted run of disjoint files in order, opening
/// one table at a time.
struct LevelFileIter {
    files: Vec<Arc<FileMetaData>>,
    cache: Arc<dyn TableCache>,
    index: usize,
    current: Option<EntryIter>,
    failed: bool,
}

impl LevelFileIter {
    fn new(files: Vec<Arc<FileMetaData>>, cache: Arc<dyn TableCache>) -> Self {
        Self {
            files,
            cache,
            index: 0,
            current: None,
            failed: false,
        }
    }
}

impl Iterator for LevelFileIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(iter) = &mut self.current {
                match iter.next() {
                    Some(Ok(entry)) => return Some(Ok(entry)),
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }
            if self.index >= self.files.len() {
                return None;
            }
            let file = &self.files[self.index];
            self.index += 1;
            match self.cache.iter(file.number, file.file_size) {
                Ok(iter) => self.current = Some(iter),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::BytewiseComparator;
    use crate::table::testing::MemTableCache;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn file(number: u64, smallest: &[u8], largest: &[u8]) -> Arc<FileMetaData> {
        Arc::new(FileMetaData::new(
            number,
            1024,
            InternalKey::new(smallest, 100, ValueType::Value),
            InternalKey::new(largest, 100, ValueType::Value),
        ))
    }

    fn version_with(files: Vec<(usize, Arc<FileMetaData>)>) -> Version {
        let mut v = Version::new(Arc::new(Config::default()), icmp());
        for (level, f) in files {
            v.files[level].push(f);
        }
        for level in 1..v.files.len() {
            let icmp = v.icmp.clone();
            v.files[level].sort_by(|a, b| icmp.compare_keys(&a.smallest, &b.smallest));
        }
        v
    }

    #[test]
    fn test_find_file() {
        let icmp = icmp();
        let files = vec![file(1, b"c", b"e"), file(2, b"g", b"j"), file(3, b"m", b"p")];

        let probe = |key: &[u8]| {
            let k = InternalKey::new(key, 100, ValueType::Value);
            find_file(&icmp, &files, k.as_bytes())
        };
        assert_eq!(probe(b"a"), 0);
        assert_eq!(probe(b"d"), 0);
        assert_eq!(probe(b"f"), 1);
        assert_eq!(probe(b"j"), 1);
        assert_eq!(probe(b"k"), 2);
        assert_eq!(probe(b"q"), 3);
    }

    #[test]
    fn test_some_file_overlaps_range_disjoint() {
        let icmp = icmp();
        let files = vec![file(1, b"c", b"e"), file(2, b"g", b"j")];

        let overlaps = |lo: Option<&[u8]>, hi: Option<&[u8]>| {
            some_file_overlaps_range(&icmp, true, &files, lo, hi)
        };
        assert!(overlaps(Some(b"d"), Some(b"d")));
        assert!(overlaps(Some(b"a"), Some(b"c")));
        assert!(overlaps(Some(b"e"), Some(b"f")));
        assert!(!overlaps(Some(b"f"), Some(b"f")));
        assert!(!overlaps(Some(b"k"), Some(b"z")));
        assert!(overlaps(None, Some(b"c")));
        assert!(overlaps(Some(b"j"), None));
        assert!(!overlaps(Some(b"k"), None));
        assert!(overlaps(None, None));
    }

    #[test]
    fn test_some_file_overlaps_range_level0() {
        let icmp = icmp();
        // Overlapping files, as level 0 produces them.
        let files = vec![file(1, b"a", b"m"), file(2, b"k", b"z")];
        assert!(some_file_overlaps_range(&icmp, false, &files, Some(b"l"), Some(b"l")));
        assert!(!some_file_overlaps_range(
            &icmp,
            false,
            &files[..1],
            Some(b"n"),
            Some(b"q")
        ));
    }

    #[test]
    fn test_get_overlapping_inputs_disjoint_level() {
        let v = version_with(vec![
            (1, file(1, b"a", b"c")),
            (1, file(2, b"e", b"g")),
            (1, file(3, b"i", b"k")),
        ]);
        let begin = InternalKey::new(b"f", 100, ValueType::Value);
        let end = InternalKey::new(b"j", 100, ValueType::Value);
        let inputs = v.get_overlapping_inputs(1, Some(&begin), Some(&end));
        let numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn test_get_overlapping_inputs_level0_expands_to_fixed_point() {
        // f1 and f2 overlap; touching "e" must pull in the whole chain.
        let v = version_with(vec![
            (0, file(1, b"a", b"f")),
            (0, file(2, b"d", b"k")),
            (0, file(3, b"j", b"n")),
        ]);
        let begin = InternalKey::new(b"e", 100, ValueType::Value);
        let end = InternalKey::new(b"e", 100, ValueType::Value);
        let inputs = v.get_overlapping_inputs(0, Some(&begin), Some(&end));
        let mut numbers: Vec<u64> = inputs.iter().map(|f| f.number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_get_overlapping_inputs_open_bounds() {
        let v = version_with(vec![(1, file(1, b"a", b"c")), (1, file(2, b"e", b"g"))]);
        let inputs = v.get_overlapping_inputs(1, None, None);
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_get_reads_newest_level0_file_first(){
        let icmp = icmp();
        let cache = MemTableCache::new(icmp.clone());
        // File 1 holds an old value, file 2 a newer one; both cover "k".
        cache.insert(1, vec![(
            InternalKey::new(b"k", 5, ValueType::Value).as_bytes().to_vec(),
            b"old".to_vec(),
        )]);
        cache.insert(2, vec![(
            InternalKey::new(b"k", 9, ValueType::Value).as_bytes().to_vec(),
            b"new".to_vec(),
        )]);
        let v = version_with(vec![(0, file(1, b"a", b"z")), (0, file(2, b"a", b"z"))]);

        let (value, _) = v.get(&cache, &LookupKey::new(b"k", 100)).unwrap();
        assert_eq!(value, Some(b"new".to_vec()));
    }

    #[test]
    fn test_get_honors_tombstone() {
        let icmp = icmp();
        let cache = MemTableCache::new(icmp.clone());
        cache.insert(2, vec![(
            InternalKey::new(b"k", 9, ValueType::Deletion).as_bytes().to_vec(),
            Vec::new(),
        )]);
        cache.insert(1, vec![(
            InternalKey::new(b"k", 5, ValueType::Value).as_bytes().to_vec(),
            b"old".to_vec(),
        )]);
        let v = version_with(vec![(0, file(2, b"a", b"z")), (1, file(1, b"a", b"z"))]);

        let (value, _) = v.get(&cache, &LookupKey::new(b"k", 100)).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_get_respects_lookup_snapshot() {
        let icmp = icmp();
        let cache = MemTableCache::new(icmp.clone());
        cache.insert(1, vec![(
            InternalKey::new(b"k", 50, ValueType::Value).as_bytes().to_vec(),
            b"future".to_vec(),
        )]);
        let v = version_with(vec![(1, file(1, b"a", b"z"))]);

        // A snapshot below the entry's sequence must not see it.
        let (value, _) = v.get(&cache, &LookupKey::new(b"k", 10)).unwrap();
        assert_eq!(value, None);
        let (value, _) = v.get(&cache, &LookupKey::new(b"k", 50)).unwrap();
        assert_eq!(value, Some(b"future".to_vec()));
    }

    #[test]
    fn test_get_charges_first_file_on_double_read() {
        let icmp = icmp();
        let cache = MemTableCache::new(icmp.clone());
        cache.insert(2, vec![]);
        cache.insert(1, vec![(
            InternalKey::new(b"k", 5, ValueType::Value).as_bytes().to_vec(),
            b"v".to_vec(),
        )]);
        let newer = file(2, b"a", b"z");
        let v = version_with(vec![(0, newer.clone()), (1, file(1, b"a", b"z"))]);

        let (value, stats) = v.get(&cache, &LookupKey::new(b"k", 100)).unwrap();
        assert_eq!(value, Some(b"v".to_vec()));
        let (seek_file, level) = stats.seek_file.expect("first file should be charged");
        assert_eq!(seek_file.number, newer.number);
        assert_eq!(level, 0);
    }

    #[test]
    fn test_get_charges_sole_file_on_miss() {
        let icmp = icmp();
        let cache = MemTableCache::new(icmp.clone());
        cache.insert(1, vec![]);
        let v = version_with(vec![(1, file(1, b"a", b"z"))]);

        let (value, stats) = v.get(&cache, &LookupKey::new(b"k", 100)).unwrap();
        assert_eq!(value, None);
        assert_eq!(stats.seek_file.unwrap().0.number, 1);
    }

    #[test]
    fn test_seek_budget_nominates_file() {
        let icmp = icmp();
        let cache = MemTableCache::new(icmp.clone());
        cache.insert(1, vec![]);
        // 1KB file: budget floors at 100 seeks.
        let v = version_with(vec![(1, file(1, b"a", b"z"))]);

        for i in 1..=100 {
            let (_, stats) = v.get(&cache, &LookupKey::new(b"k", 100)).unwrap();
            let nominated = v.update_stats(&stats);
            assert_eq!(nominated, i == 100, "call {i}");
            assert_eq!(v.file_to_compact.read().unwrap().is_some(), i == 100);
        }
    }

    #[test]
    fn test_record_read_sample_needs_two_overlaps() {
        let v = version_with(vec![(1, file(1, b"a", b"z"))]);
        let key = InternalKey::new(b"k", 9, ValueType::Value);
        // A single overlapping file is the common case and charges nothing.
        assert!(!v.record_read_sample(key.as_bytes()));
        assert_eq!(
            v.files[1][0].allowed_seeks.load(AtomicOrdering::SeqCst),
            100
        );

        let v = version_with(vec![(0, file(2, b"a", b"z")), (1, file(1, b"a", b"z"))]);
        assert!(!v.record_read_sample(key.as_bytes()));
        // The newest overlapping file was charged one seek.
        assert_eq!(
            v.files[0][0].allowed_seeks.load(AtomicOrdering::SeqCst),
            99
        );
    }

    #[test]
    fn test_pick_level_for_memtable_output() {
        // Empty version: flush sinks to max_mem_compact_level.
        let v = version_with(vec![]);
        assert_eq!(v.pick_level_for_memtable_output(b"a", b"b"), 2);

        // Overlap at level 0 pins the flush there.
        let v = version_with(vec![(0, file(1, b"a", b"m"))]);
        assert_eq!(v.pick_level_for_memtable_output(b"b", b"c"), 0);

        // Overlap at level 1 stops the descent at level 0.
        let v = version_with(vec![(1, file(1, b"a", b"m"))]);
        assert_eq!(v.pick_level_for_memtable_output(b"b", b"c"), 0);

        // Overlap at level 2 allows level 1.
        let v = version_with(vec![(2, file(1, b"a", b"m"))]);
        assert_eq!(v.pick_level_for_memtable_output(b"b", b"c"), 1);
    }

    #[test]
    fn test_iterators_cover_all_levels() {
        let icmp = icmp();
        let cache = Arc::new(MemTableCache::new(icmp.clone()));
        let entry = |k: &[u8], seq: u64| {
            (
                InternalKey::new(k, seq, ValueType::Value).as_bytes().to_vec(),
                k.to_vec(),
            )
        };
        cache.insert(1, vec![entry(b"b", 7)]);
        cache.insert(2, vec![entry(b"a", 3)]);
        cache.insert(3, vec![entry(b"c", 3)]);
        let v = version_with(vec![
            (0, file(1, b"b", b"b")),
            (1, file(2, b"a", b"a")),
            (1, file(3, b"c", b"c")),
        ]);

        // One iterator for the level-0 file, one for the level-1 run.
        let iters = v.iterators(cache).unwrap();
        assert_eq!(iters.len(), 2);
        let mut user_keys: Vec<Vec<u8>> = iters
            .into_iter()
            .flatten()
            .map(|entry| {
                let (key, _) = entry.unwrap();
                crate::key::extract_user_key(&key).to_vec()
            })
            .collect();
        user_keys.sort();
        assert_eq!(user_keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let listing = v.debug_string();
        assert!(listing.contains("--- level 0 ---"));
        assert!(listing.contains("1:1024"));
    }

    #[test]
    fn test_overlap_in_level() {
        let v = version_with(vec![(0, file(1, b"a", b"f")), (1, file(2, b"h", b"m"))]);
        assert!(v.overlap_in_level(0, Some(b"e"), Some(b"g")));
        assert!(!v.overlap_in_level(0, Some(b"g"), Some(b"g")));
        assert!(v.overlap_in_level(1, Some(b"a"), Some(b"h")));
        assert!(!v.overlap_in_level(1, Some(b"n"), None));
    }
}
