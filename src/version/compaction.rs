//! A single compaction job.
//!
//! A `Compaction` names the files to merge (inputs from `level` and
//! `level + 1`), carries the edit that will install the result, and tracks
//! the scan state the executor consults while writing outputs: when to cut
//! an output file so it will not drag too many grandparent files into a
//! future compaction, and whether a tombstone has any older data left to
//! shadow.
//!
//! The job pins the version it was planned against, so its input files
//! cannot be deleted while it runs. Nothing here touches disk; executing
//! the merge and calling `log_and_apply` with the finished edit is the
//! caller's job.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::Config;
use crate::key::InternalKeyComparator;
use crate::manifest::edit::VersionEdit;
use crate::version::{total_file_size, FileMetaData, Version};

pub struct Compaction {
    pub(crate) level: usize,
    max_output_file_size: u64,
    max_grandparent_overlap_bytes: u64,
    icmp: InternalKeyComparator,
    pub(crate) input_version: Option<Arc<Version>>,
    pub(crate) edit: VersionEdit,

    /// Files from `level` and from `level + 1`.
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],

    /// Files at `level + 2` overlapping the compaction's range. Outputs are
    /// cut whenever they come to overlap too much of these, or compacting
    /// `level + 1` later would have to rewrite all of it at once.
    pub(crate) grandparents: Vec<Arc<FileMetaData>>,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    /// Per-level positions for the monotonic `is_base_level_for_key` scan.
    level_ptrs: Vec<usize>,
}

impl Compaction {
    pub(crate) fn new(config: &Config, icmp: InternalKeyComparator, level: usize) -> Self {
        Self {
            level,
            max_output_file_size: config.max_file_size_for_level(level),
            max_grandparent_overlap_bytes: config.max_grandparent_overlap_bytes(),
            icmp,
            input_version: None,
            edit: VersionEdit::new(),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: vec![0; config.num_levels],
        }
    }

    /// The level being compacted; inputs come from here and the level below.
    pub fn level(&self) -> usize {
        self.level
    }

    /// The edit that will describe this compaction's result.
    pub fn edit(&mut self) -> &mut VersionEdit {
        &mut self.edit
    }

    /// Consume the job, yielding its edit for `log_and_apply`.
    pub fn into_edit(self) -> VersionEdit {
        self.edit
    }

    /// `which` is 0 for the `level` inputs, 1 for the `level + 1` inputs.
    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn input(&self, which: usize, index: usize) -> &Arc<FileMetaData> {
        &self.inputs[which][index]
    }

    /// Maximum size for one output file of this compaction.
    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// True when the job can be carried out by re-parenting its single
    /// input file to `level + 1` without rewriting any data.
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap_bytes
    }

    /// Record the deletion of every input file in the edit.
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for file in &self.inputs[which] {
                self.edit.remove_file(self.level + which, file.number);
            }
        }
    }

    /// True when no level below `level + 1` holds `user_key`. A deletion
    /// tombstone whose key passes this check shadows nothing and may be
    /// dropped from the output.
    ///
    /// Keys must be supplied in scan order; each level's cursor only moves
    /// forward.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let Some(version) = &self.input_version else {
            return true;
        };
        let ucmp = self.icmp.user_comparator();
        for level in (self.level + 2)..version.files.len() {
            let files = &version.files[level];
            while self.level_ptrs[level] < files.len() {
                let file = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, file.largest.user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, file.smallest.user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Called with each internal key before it is appended to the current
    /// output. Returns true when the output should be closed first, because
    /// extending it past this key would overlap too many grandparent bytes.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        while self.grandparent_index < self.grandparents.len()
            && self.icmp.compare(
                internal_key,
                self.grandparents[self.grandparent_index].largest.as_bytes(),
            ) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap_bytes {
            self.overlapped_bytes = 0;
            return true;
        }
        false
    }

    /// Drop the pin on the planning-time version once the compaction has
    /// been applied (or abandoned).
    pub fn release_inputs(&mut self) {
        self.input_version = None;
    }
}
