//! The version set: owner of the version chain and the MANIFEST.
//!
//! All mutation funnels through [`VersionSet::log_and_apply`]: build the
//! next version from the current one plus an edit, append the edit durably
//! to the MANIFEST, then install the new version as current. Readers that
//! pinned an older version keep it (and its files) alive through their
//! `Arc`s; the set keeps a deque of possibly-pinned versions so the live
//! file computation can see them all.
//!
//! The set is not internally synchronized. The caller owns the database
//! mutex and holds it (or an exclusive borrow) across every call here,
//! which is also what makes `log_and_apply` single-writer.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;

use crate::config::Config;
use crate::corruption;
use crate::env::Env;
use crate::error::Result;
use crate::filename::{
    descriptor_file_name, parse_file_name, read_current_file, set_current_file, FileKind,
};
use crate::iterator::MergingIterator;
use crate::key::{InternalKey, InternalKeyComparator};
use crate::manifest::edit::VersionEdit;
use crate::manifest::Manifest;
use crate::table::{EntryIter, TableCache};
use crate::version::compaction::Compaction;
use crate::version::{total_file_size, FileMetaData, Version};

pub struct VersionSet {
    env: Arc<dyn Env>,
    dir: PathBuf,
    config: Arc<Config>,
    icmp: InternalKeyComparator,
    table_cache: Arc<dyn TableCache>,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: u64,
    /// Number of the write-ahead log covering current writes.
    log_number: u64,
    /// Log backing a memtable still being flushed, 0 if none.
    prev_log_number: u64,

    descriptor_log: Option<Manifest>,

    /// Versions that may still be pinned by readers; the newest is current.
    versions: VecDeque<Arc<Version>>,
    current: Arc<Version>,

    /// Per-level key where the next size-driven compaction should start;
    /// empty means the start of the level. Encoded internal keys.
    compact_pointer: Vec<Vec<u8>>,
}

impl VersionSet {
    pub fn new(
        env: Arc<dyn Env>,
        config: Config,
        icmp: InternalKeyComparator,
        table_cache: Arc<dyn TableCache>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let mut first = Version::new(config.clone(), icmp.clone());
        first.compaction_score = -1.0;
        let current = Arc::new(first);
        Ok(Self {
            env,
            dir: config.dir.clone(),
            icmp,
            table_cache,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            descriptor_log: None,
            versions: VecDeque::from([current.clone()]),
            current,
            compact_pointer: vec![Vec::new(); config.num_levels],
            config,
        })
    }

    pub fn current(&self) -> Arc<Version> {
        self.current.clone()
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// Allocate and return a new file number.
    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Hand back `number` unless something newer was allocated since. Only
    /// the most recent allocation can be returned.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    /// Bump the allocator past an externally observed file number.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: u64) {
        assert!(
            sequence >= self.last_sequence,
            "sequence numbers must not regress: {} < {}",
            sequence,
            self.last_sequence
        );
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.files[level].len()
    }

    pub fn num_level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.current.files[level])
    }

    /// One-line file-count summary, e.g. `files[ 2 4 0 0 0 0 0 ]`.
    pub fn level_summary(&self) -> String {
        let counts = self.current.files.iter().map(|f| f.len()).join(" ");
        format!("files[ {counts} ]")
    }

    /// Apply `edit` to the current version, persist it to the MANIFEST, and
    /// install the result. Missing bookkeeping fields in the edit are filled
    /// from the set's counters. On error nothing is installed and the edit
    /// must be considered not applied.
    pub fn log_and_apply(&mut self, mut edit: VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(n) => assert!(n >= self.log_number && n < self.next_file_number),
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        // Claim the manifest's own number before stamping the allocator
        // state into the edit, so replaying it leaves the counter past it.
        if self.descriptor_log.is_none() && self.manifest_file_number == 0 {
            self.manifest_file_number = self.new_file_number();
        }
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut version = {
            let mut builder = Builder::new(self.icmp.clone(), self.current.clone());
            builder.apply(&edit, &mut self.compact_pointer)?;
            builder.save_to(self.config.clone())?
        };
        self.finalize(&mut version);

        // First transition ever: open a fresh MANIFEST seeded with a
        // snapshot of the (empty or recovered) current state.
        let mut created_descriptor = false;
        if self.descriptor_log.is_none() {
            let path = descriptor_file_name(&self.dir, self.manifest_file_number);
            tracing::info!(manifest = %path.display(), "creating manifest");
            self.descriptor_log = Some(Manifest::create(self.env.as_ref(), &path)?);
            created_descriptor = true;
            if let Err(e) = self.write_snapshot() {
                self.abandon_descriptor();
                return Err(e);
            }
        }

        let result = (|| {
            let log = self.descriptor_log.as_mut().unwrap();
            log.append_edit(&edit)?;
            log.sync()?;
            if created_descriptor {
                set_current_file(self.env.as_ref(), &self.dir, self.manifest_file_number)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.log_number = edit.log_number.unwrap();
                self.prev_log_number = edit.prev_log_number.unwrap();
                self.append_version(version);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "manifest write failed, edit not installed");
                if created_descriptor {
                    self.abandon_descriptor();
                }
                Err(e)
            }
        }
    }

    fn abandon_descriptor(&mut self) {
        self.descriptor_log = None;
        let path = descriptor_file_name(&self.dir, self.manifest_file_number);
        let _ = self.env.remove(&path);
        self.manifest_file_number = 0;
    }

    /// Install `version` as current and prune chain entries nobody holds.
    fn append_version(&mut self, version: Version) {
        let version = Arc::new(version);
        self.current = version.clone();
        self.versions.push_back(version);
        self.prune_versions();
    }

    fn prune_versions(&mut self) {
        // An entry at strong count 1 exists only in the deque: no reader and
        // no in-flight compaction can reach it any more.
        let current = self.current.clone();
        self.versions
            .retain(|v| Arc::ptr_eq(v, &current) || Arc::strong_count(v) > 1);
    }

    /// Write an edit describing the complete current state.
    fn write_snapshot(&mut self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        for (level, pointer) in self.compact_pointer.iter().enumerate() {
            if !pointer.is_empty() {
                edit.set_compact_pointer(level, InternalKey::decode_from(pointer.clone())?);
            }
        }
        for (level, files) in self.current.files.iter().enumerate() {
            for file in files {
                edit.add_file(
                    level,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
            }
        }
        self.descriptor_log.as_mut().unwrap().append_edit(&edit)
    }

    /// Rebuild state from CURRENT and the MANIFEST it names. Returns true
    /// when a new MANIFEST must be written (the old one was not reused).
    pub fn recover(&mut self) -> Result<bool> {
        let descriptor_name = read_current_file(self.env.as_ref(), &self.dir)?;
        let descriptor_path = self.dir.join(&descriptor_name);

        let mut builder = Builder::new(self.icmp.clone(), self.current.clone());
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut edit_count = 0usize;

        for edit in Manifest::edits(self.env.as_ref(), &descriptor_path)? {
            let edit = edit?;
            if let Some(name) = &edit.comparator_name {
                if name != self.icmp.user_comparator().name() {
                    return corruption!(
                        "comparator mismatch: manifest uses {name}, configured {}",
                        self.icmp.user_comparator().name()
                    );
                }
            }
            builder.apply(&edit, &mut self.compact_pointer)?;
            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
            edit_count += 1;
        }

        let Some(next_file_number) = next_file_number else {
            return corruption!("manifest has no next-file-number entry");
        };
        let Some(last_sequence) = last_sequence else {
            return corruption!("manifest has no last-sequence entry");
        };
        let Some(log_number) = log_number else {
            return corruption!("manifest has no log-number entry");
        };
        let prev_log_number = prev_log_number.unwrap_or(0);

        self.next_file_number = next_file_number;
        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;

        let mut version = builder.save_to(self.config.clone())?;
        self.finalize(&mut version);
        self.append_version(version);

        self.manifest_file_number = self.next_file_number;
        self.next_file_number += 1;

        let reused = self.maybe_reuse_manifest(&descriptor_name, &descriptor_path);
        tracing::info!(
            manifest = %descriptor_name,
            edits = edit_count,
            log_number,
            last_sequence,
            reused,
            "recovered version set"
        );
        Ok(!reused)
    }

    /// Keep appending to the recovered MANIFEST when allowed and still small.
    fn maybe_reuse_manifest(&mut self, name: &str, path: &std::path::Path) -> bool {
        if !self.config.reuse_manifest {
            return false;
        }
        let Some((FileKind::Descriptor, number)) = parse_file_name(name) else {
            return false;
        };
        let Ok(size) = self.env.file_size(path) else {
            return false;
        };
        if size >= self.config.target_file_size {
            return false;
        }
        match Manifest::reuse(self.env.as_ref(), path) {
            Ok(manifest) => {
                tracing::info!(manifest = name, size, "reusing manifest");
                self.descriptor_log = Some(manifest);
                self.manifest_file_number = number;
                true
            }
            Err(e) => {
                tracing::warn!(manifest = name, error = %e, "cannot reuse manifest");
                false
            }
        }
    }

    /// Compute the size-driven compaction score of a freshly built version.
    fn finalize(&self, version: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0f64;
        for level in 0..self.config.num_levels - 1 {
            let score = if level == 0 {
                // File count, not bytes: level-0 files overlap, so every one
                // of them taxes every read, and flushes must never stall
                // behind a byte budget chosen for a large write buffer.
                version.files[0].len() as f64 / self.config.l0_compaction_trigger as f64
            } else {
                total_file_size(&version.files[level]) as f64
                    / self.config.max_bytes_for_level(level)
            };
            if score > best_score {
                best_score = score;
                best_level = level;
            }
        }
        version.compaction_level = best_level;
        version.compaction_score = best_score;
    }

    /// True when either trigger (size score or seek budget) fires.
    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0
            || self.current.file_to_compact.read().unwrap().is_some()
    }

    /// All file numbers referenced by any version a reader may still hold.
    /// The collector deletes only table files outside this set (and below
    /// the file-number allocator, so freshly allocated numbers survive too).
    pub fn add_live_files(&mut self, live: &mut HashSet<u64>) {
        self.prune_versions();
        for version in &self.versions {
            for files in &version.files {
                for file in files {
                    live.insert(file.number);
                }
            }
        }
    }

    /// Largest overlap in bytes between any single file at some level >= 1
    /// and the level below it.
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let mut result = 0;
        for level in 1..self.config.num_levels - 1 {
            for file in &self.current.files[level] {
                let overlaps = self.current.get_overlapping_inputs(
                    level + 1,
                    Some(&file.smallest),
                    Some(&file.largest),
                );
                result = result.max(total_file_size(&overlaps));
            }
        }
        result
    }

    /// Pick the next compaction to run, size-driven triggers first, or
    /// `None` when the tree is in shape.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = self.current.clone();

        let size_trigger = current.compaction_score >= 1.0;
        let seek_trigger = current.file_to_compact.read().unwrap().clone();

        let mut compaction;
        let level;
        if size_trigger {
            level = current.compaction_level;
            assert!(level + 1 < self.config.num_levels);
            compaction = Compaction::new(&self.config, self.icmp.clone(), level);

            // Resume after the key where the last compaction of this level
            // stopped, wrapping to the start of the level.
            for file in &current.files[level] {
                if self.compact_pointer[level].is_empty()
                    || self
                        .icmp
                        .compare(file.largest.as_bytes(), &self.compact_pointer[level])
                        == std::cmp::Ordering::Greater
                {
                    compaction.inputs[0].push(file.clone());
                    break;
                }
            }
            if compaction.inputs[0].is_empty() {
                compaction.inputs[0].push(current.files[level][0].clone());
            }
        } else if let Some((file, seek_level)) = seek_trigger {
            level = seek_level;
            compaction = Compaction::new(&self.config, self.icmp.clone(), level);
            compaction.inputs[0].push(file);
        } else {
            return None;
        }

        compaction.input_version = Some(current.clone());

        // Level-0 files overlap each other, so the chosen file drags in
        // every level-0 file its range touches.
        if level == 0 {
            let (smallest, largest) = self.get_range(&compaction.inputs[0]);
            compaction.inputs[0] =
                current.get_overlapping_inputs(0, Some(&smallest), Some(&largest));
            assert!(!compaction.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut compaction);

        tracing::info!(
            level,
            size_trigger,
            inputs = compaction.inputs[0].len(),
            parent_inputs = compaction.inputs[1].len(),
            grandparents = compaction.grandparents.len(),
            trivial = compaction.is_trivial_move(),
            "picked compaction"
        );
        Some(compaction)
    }

    /// Compaction covering `[begin, end]` at `level`, or `None` when the
    /// level holds nothing in that range. For levels >= 1 the input set is
    /// clipped at a whole-file boundary to keep one run bounded.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        assert!(level + 1 < self.config.num_levels);
        let current = self.current.clone();
        let mut inputs = current.get_overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }

        if level > 0 {
            let limit = self.config.max_file_size_for_level(level);
            let mut total = 0;
            for i in 0..inputs.len() {
                total += inputs[i].file_size;
                if total >= limit {
                    inputs.truncate(i + 1);
                    break;
                }
            }
        }

        let mut compaction = Compaction::new(&self.config, self.icmp.clone(), level);
        compaction.input_version = Some(current);
        compaction.inputs[0] = inputs;
        self.setup_other_inputs(&mut compaction);
        Some(compaction)
    }

    /// Smallest and largest internal key across `files`.
    fn get_range(&self, files: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
        assert!(!files.is_empty());
        let mut smallest = files[0].smallest.clone();
        let mut largest = files[0].largest.clone();
        for file in &files[1..] {
            if self.icmp.compare_keys(&file.smallest, &smallest) == std::cmp::Ordering::Less {
                smallest = file.smallest.clone();
            }
            if self.icmp.compare_keys(&file.largest, &largest) == std::cmp::Ordering::Greater {
                largest = file.largest.clone();
            }
        }
        (smallest, largest)
    }

    fn get_range2(
        &self,
        inputs0: &[Arc<FileMetaData>],
        inputs1: &[Arc<FileMetaData>],
    ) -> (InternalKey, InternalKey) {
        let all: Vec<Arc<FileMetaData>> =
            inputs0.iter().chain(inputs1.iter()).cloned().collect();
        self.get_range(&all)
    }

    /// Fill in the parent-level inputs and grandparents for a compaction
    /// whose `inputs[0]` has been chosen, growing `inputs[0]` when that is
    /// free (it pulls in no extra parent files and stays within the
    /// expansion budget).
    fn setup_other_inputs(&mut self, compaction: &mut Compaction) {
        let current = compaction.input_version.clone().expect("input version set");
        let level = compaction.level;

        let (smallest, mut largest) = self.get_range(&compaction.inputs[0]);
        compaction.inputs[1] =
            current.get_overlapping_inputs(level + 1, Some(&smallest), Some(&largest));

        let (mut all_start, mut all_limit) =
            self.get_range2(&compaction.inputs[0], &compaction.inputs[1]);

        if !compaction.inputs[1].is_empty() {
            let expanded0 =
                current.get_overlapping_inputs(level, Some(&all_start), Some(&all_limit));
            let inputs1_size = total_file_size(&compaction.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > compaction.inputs[0].len()
                && inputs1_size + expanded0_size
                    < self.config.expanded_compaction_byte_size_limit()
            {
                let (new_start, new_limit) = self.get_range(&expanded0);
                let expanded1 =
                    current.get_overlapping_inputs(level + 1, Some(&new_start), Some(&new_limit));
                if expanded1.len() == compaction.inputs[1].len() {
                    tracing::info!(
                        level,
                        from = compaction.inputs[0].len(),
                        to = expanded0.len(),
                        "expanding compaction inputs"
                    );
                    largest = new_limit;
                    compaction.inputs[0] = expanded0;
                    compaction.inputs[1] = expanded1;
                    let range = self.get_range2(&compaction.inputs[0], &compaction.inputs[1]);
                    all_start = range.0;
                    all_limit = range.1;
                }
            }
        }

        if level + 2 < self.config.num_levels {
            compaction.grandparents =
                current.get_overlapping_inputs(level + 2, Some(&all_start), Some(&all_limit));
        }

        // The end of this compaction is where the next one at this level
        // starts; recorded in the edit so it survives restarts.
        self.compact_pointer[level] = largest.as_bytes().to_vec();
        compaction
            .edit
            .set_compact_pointer(level, largest.clone());
    }

    /// One merged stream over every input of `compaction`, for the executor
    /// to drain into output files.
    pub fn make_input_iterator(&self, compaction: &Compaction) -> Result<MergingIterator> {
        let mut sources: Vec<EntryIter> = Vec::new();
        for which in 0..2 {
            if compaction.inputs[which].is_empty() {
                continue;
            }
            if compaction.level + which == 0 {
                for file in &compaction.inputs[0] {
                    sources.push(self.table_cache.iter(file.number, file.file_size)?);
                }
            } else {
                // Disjoint sorted run: one concatenating stream suffices.
                sources.push(Box::new(crate::version::LevelFileIter::new(
                    compaction.inputs[which].clone(),
                    self.table_cache.clone(),
                )));
            }
        }
        MergingIterator::new(self.icmp.clone(), sources)
    }
}

/// Accumulates edits on top of a base version and materializes the result.
struct Builder {
    icmp: InternalKeyComparator,
    base: Arc<Version>,
    levels: Vec<LevelState>,
}

#[derive(Default)]
struct LevelState {
    added: Vec<Arc<FileMetaData>>,
    deleted: HashSet<u64>,
}

impl Builder {
    fn new(icmp: InternalKeyComparator, base: Arc<Version>) -> Self {
        let levels = (0..base.files.len()).map(|_| LevelState::default()).collect();
        Self { icmp, base, levels }
    }

    /// Fold one edit in. Compaction pointers go straight to the set's
    /// table; file deletions and additions accumulate per level. A level
    /// index beyond the configured tree is corrupt input, not a crash.
    fn apply(&mut self, edit: &VersionEdit, compact_pointer: &mut [Vec<u8>]) -> Result<()> {
        let num_levels = self.levels.len();
        let check_level = move |level: usize| -> Result<()> {
            if level >= num_levels {
                return corruption!("edit names level {level}, tree has {num_levels}");
            }
            Ok(())
        };
        for (level, key) in &edit.compact_pointers {
            check_level(*level)?;
            compact_pointer[*level] = key.as_bytes().to_vec();
        }
        for (level, number) in &edit.deleted_files {
            check_level(*level)?;
            self.levels[*level].deleted.insert(*number);
        }
        for (level, file) in &edit.new_files {
            check_level(*level)?;
            let meta = Arc::new(FileMetaData::new(
                file.number,
                file.file_size,
                file.smallest.clone(),
                file.largest.clone(),
            ));
            self.levels[*level].deleted.remove(&file.number);
            self.levels[*level].added.push(meta);
        }
        Ok(())
    }

    /// Merge base and accumulated files into a new version. Fails with
    /// `Corruption` if the result would break the disjointness invariant of
    /// levels >= 1.
    fn save_to(mut self, config: Arc<Config>) -> Result<Version> {
        let icmp = self.icmp.clone();
        let by_smallest = move |a: &Arc<FileMetaData>, b: &Arc<FileMetaData>| {
            icmp.compare_keys(&a.smallest, &b.smallest)
                .then_with(|| a.number.cmp(&b.number))
        };

        let mut version = Version::new(config, self.icmp.clone());
        for (level, state) in self.levels.iter_mut().enumerate() {
            state.added.sort_by(|a, b| by_smallest(a, b));
            let base_files = self.base.files[level].iter().cloned();
            let added_files = state.added.iter().cloned();
            let merged = base_files
                .merge_by(added_files, |a, b| by_smallest(a, b) != std::cmp::Ordering::Greater);

            for file in merged {
                if state.deleted.contains(&file.number) {
                    continue;
                }
                if level > 0 {
                    if let Some(previous) = version.files[level].last() {
                        if self
                            .icmp
                            .compare_keys(&previous.largest, &file.smallest)
                            != std::cmp::Ordering::Less
                        {
                            return corruption!(
                                "overlapping files {} and {} at level {level}",
                                previous.number,
                                file.number
                            );
                        }
                    }
                }
                version.files[level].push(file);
            }
        }
        Ok(version)
    }
}
