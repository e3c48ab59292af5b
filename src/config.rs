/*!
 * Configuration types for Collate
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CollateError, Result};

/// Top-level configuration for one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of cooperating ranks (0 = available parallelism)
    #[serde(default)]
    pub workers: usize,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Copy-mode policy
    #[serde(default)]
    pub copy: CopyPolicy,

    /// Compress-mode policy
    #[serde(default)]
    pub compress: CompressConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            log_level: LogLevel::Warn,
            log_file: None,
            copy: CopyPolicy::default(),
            compress: CompressConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| CollateError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Rank count after resolving `workers = 0`
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            get_cpu_count()
        } else {
            self.workers
        }
    }
}

/// Copy policy, fixed for the lifetime of one invocation and read-only to all ranks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyPolicy {
    /// Descend into directories
    #[serde(default)]
    pub recursive: bool,

    /// Overwrite existing destinations
    #[serde(default = "default_true")]
    pub clobber: bool,

    /// Copy what symlinks point to instead of the links themselves
    #[serde(default)]
    pub dereference: bool,

    /// Preserve permissions, ownership and timestamps
    #[serde(default)]
    pub preserve: bool,

    /// Re-read written segments and compare blake3 digests
    #[serde(default)]
    pub verify: bool,

    /// Files larger than this are split into several work items
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,

    /// Progress verbosity (0 = quiet)
    #[serde(default)]
    pub verbosity: u8,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            recursive: false,
            clobber: true,
            dereference: false,
            preserve: false,
            verify: false,
            segment_size: default_segment_size(),
            verbosity: 0,
        }
    }
}

impl CopyPolicy {
    /// Archive preset: recurse, keep symlinks as links, preserve attributes
    pub fn archive() -> Self {
        Self {
            recursive: true,
            dereference: false,
            preserve: true,
            ..Default::default()
        }
    }
}

/// Compress-mode policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressConfig {
    /// Keep the original file after a successful compression
    #[serde(default)]
    pub keep: bool,

    /// Overwrite an existing compressed destination
    #[serde(default)]
    pub force: bool,

    /// Output suffix override (defaults to the codec's suffix)
    #[serde(default)]
    pub suffix: Option<String>,

    /// Transform applied to each rank's segment
    #[serde(default)]
    pub codec: Codec,

    /// Progress verbosity (0 = quiet)
    #[serde(default)]
    pub verbosity: u8,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            keep: false,
            force: false,
            suffix: None,
            codec: Codec::default(),
            verbosity: 0,
        }
    }
}

impl CompressConfig {
    /// Suffix appended to compressed outputs
    pub fn output_suffix(&self) -> &str {
        match (&self.suffix, &self.codec) {
            (Some(suffix), _) => suffix,
            (None, Codec::Zstd { .. }) => ".zst",
            (None, Codec::Command { suffix, .. }) => suffix,
        }
    }
}

/// Segment transform selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// In-process Zstd with level (1-22)
    Zstd { level: i32 },

    /// External program invoked as `program args... FILE`, producing `FILE<suffix>`
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        suffix: String,
    },
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Zstd { level: 3 }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    #[default]
    Warn,

    /// Info, warnings, and errors
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    /// Raise the level by `-v` repeats, saturating at trace
    pub fn raised_by(self, verbosity: u8) -> LogLevel {
        const LADDER: [LogLevel; 5] = [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ];
        let current = LADDER.iter().position(|l| *l == self).unwrap_or(1);
        LADDER[(current + verbosity as usize).min(LADDER.len() - 1)]
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_segment_size() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

/// Get the number of available CPU cores
fn get_cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.workers, 0);
        assert!(config.copy.clobber);
        assert!(!config.copy.recursive);
        assert!(!config.compress.keep);
        assert_eq!(config.compress.codec, Codec::Zstd { level: 3 });
        assert!(config.effective_workers() > 0);
    }

    #[test]
    fn test_archive_preset() {
        let policy = CopyPolicy::archive();
        assert!(policy.recursive);
        assert!(policy.preserve);
        assert!(!policy.dereference);
        assert!(policy.clobber);
    }

    #[test]
    fn test_output_suffix() {
        let mut config = CompressConfig::default();
        assert_eq!(config.output_suffix(), ".zst");

        config.codec = Codec::Command {
            program: "gzip".to_string(),
            args: vec!["-9".to_string()],
            suffix: ".gz".to_string(),
        };
        assert_eq!(config.output_suffix(), ".gz");

        config.suffix = Some(".z".to_string());
        assert_eq!(config.output_suffix(), ".z");
    }

    #[test]
    fn test_log_level_raise() {
        assert_eq!(LogLevel::Warn.raised_by(0), LogLevel::Warn);
        assert_eq!(LogLevel::Warn.raised_by(1), LogLevel::Info);
        assert_eq!(LogLevel::Warn.raised_by(2), LogLevel::Debug);
        assert_eq!(LogLevel::Warn.raised_by(9), LogLevel::Trace);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_toml_example() {
        let toml_str = r#"
workers = 4
log_level = "info"

[copy]
recursive = true
clobber = false
preserve = true
segment_size = 1048576

[compress]
keep = true
codec = { command = { program = "gzip", args = ["-6"], suffix = ".gz" } }
"#;

        let config: RunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.copy.recursive);
        assert!(!config.copy.clobber);
        assert!(config.copy.preserve);
        assert!(!config.copy.dereference);
        assert_eq!(config.copy.segment_size, 1024 * 1024);
        assert!(config.compress.keep);
        assert_eq!(config.compress.output_suffix(), ".gz");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collate.toml");

        let mut config = RunConfig::default();
        config.workers = 3;
        config.copy = CopyPolicy::archive();
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = RunConfig::from_file(&path).unwrap();
        assert_eq!(loaded.workers, 3);
        assert_eq!(loaded.copy, CopyPolicy::archive());
    }
}
