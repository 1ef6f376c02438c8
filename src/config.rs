use std::path::PathBuf;

use crate::error::Result;
use crate::invalid_argument;

/// Configuration for the version and compaction core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the MANIFEST, CURRENT and table files.
    pub dir: PathBuf,

    /// Number of levels in the tree (default: 7).
    pub num_levels: usize,

    /// Level 0 file count that triggers a compaction (default: 4).
    pub l0_compaction_trigger: usize,

    /// Level 0 file count at which the caller should slow down writes
    /// (default: 8). Enforcement is the caller's; the core only reports
    /// file counts.
    pub l0_slowdown_writes_trigger: usize,

    /// Level 0 file count at which the caller should stop writes
    /// (default: 12).
    pub l0_stop_writes_trigger: usize,

    /// Target size of a compaction output file (default: 2MB).
    pub target_file_size: u64,

    /// Highest level a fresh memtable flush may be placed at when it
    /// overlaps nothing below (default: 2).
    pub max_mem_compact_level: usize,

    /// Approximate gap in bytes between read samples (default: 1MB).
    pub read_bytes_period: u64,

    /// Append to the existing MANIFEST on recovery when it is still small,
    /// instead of starting a fresh one (default: false).
    pub reuse_manifest: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            num_levels: 7,
            l0_compaction_trigger: 4,
            l0_slowdown_writes_trigger: 8,
            l0_stop_writes_trigger: 12,
            target_file_size: 2 * 1024 * 1024,
            max_mem_compact_level: 2,
            read_bytes_period: 1024 * 1024,
            reuse_manifest: false,
        }
    }
}

impl Config {
    /// Create a new config with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the number of levels.
    pub fn num_levels(mut self, levels: usize) -> Self {
        self.num_levels = levels;
        self
    }

    /// Set the level 0 compaction trigger.
    pub fn l0_compaction_trigger(mut self, files: usize) -> Self {
        self.l0_compaction_trigger = files;
        self
    }

    /// Set the target output file size.
    pub fn target_file_size(mut self, bytes: u64) -> Self {
        self.target_file_size = bytes;
        self
    }

    /// Allow reusing the existing MANIFEST on recovery.
    pub fn reuse_manifest(mut self, enabled: bool) -> Self {
        self.reuse_manifest = enabled;
        self
    }

    /// Check the configuration for values the core cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.num_levels < 3 {
            return invalid_argument!(
                "num_levels must be at least 3, got {}",
                self.num_levels
            );
        }
        if self.l0_compaction_trigger == 0 {
            return invalid_argument!("l0_compaction_trigger must be non-zero");
        }
        if self.target_file_size == 0 {
            return invalid_argument!("target_file_size must be non-zero");
        }
        if self.max_mem_compact_level + 1 >= self.num_levels {
            return invalid_argument!(
                "max_mem_compact_level {} does not fit in {} levels",
                self.max_mem_compact_level,
                self.num_levels
            );
        }
        Ok(())
    }

    /// Maximum size of a single output file for a compaction at `level`.
    pub fn max_file_size_for_level(&self, _level: usize) -> u64 {
        self.target_file_size
    }

    /// Byte budget for a level, 10MB at level 1 and growing tenfold per
    /// level. Level 0 is scored by file count, not bytes.
    pub fn max_bytes_for_level(&self, level: usize) -> f64 {
        let mut result = 10.0 * 1048576.0;
        let mut level = level;
        while level > 1 {
            result *= 10.0;
            level -= 1;
        }
        result
    }

    /// Maximum grandparent overlap before a compaction output is cut.
    pub fn max_grandparent_overlap_bytes(&self) -> u64 {
        10 * self.target_file_size
    }

    /// Ceiling on the total input size of an expanded compaction.
    pub fn expanded_compaction_byte_size_limit(&self) -> u64 {
        25 * self.target_file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.num_levels, 7);
        assert_eq!(config.l0_compaction_trigger, 4);
        assert_eq!(config.target_file_size, 2 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/db")
            .num_levels(5)
            .l0_compaction_trigger(2)
            .target_file_size(1024 * 1024)
            .reuse_manifest(true);

        assert_eq!(config.dir, PathBuf::from("/tmp/db"));
        assert_eq!(config.num_levels, 5);
        assert_eq!(config.l0_compaction_trigger, 2);
        assert!(config.reuse_manifest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_too_few_levels() {
        let config = Config::new("/tmp/db").num_levels(2);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_level_byte_budgets() {
        let config = Config::default();
        assert_eq!(config.max_bytes_for_level(1), 10.0 * 1048576.0);
        assert_eq!(config.max_bytes_for_level(2), 100.0 * 1048576.0);
        assert_eq!(config.max_bytes_for_level(3), 1000.0 * 1048576.0);
    }

    #[test]
    fn test_derived_compaction_limits() {
        let config = Config::default().target_file_size(2 * 1024 * 1024);
        assert_eq!(config.max_grandparent_overlap_bytes(), 20 * 1024 * 1024);
        assert_eq!(
            config.expanded_compaction_byte_size_limit(),
            50 * 1024 * 1024
        );
    }
}
