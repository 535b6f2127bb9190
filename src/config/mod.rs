//! Configuration module for readpipe
//!
//! A single [`PipelineConfig`] describes everything needed to build a
//! pipeline: queue capacities and thread counts for each node, the runner
//! batch settings, the modification callers, and logging.
//!
//! # Files
//!
//! Configs are stored as TOML (`.toml`) or JSON (anything else). Every field
//! has a default, so an empty file is a valid config.
//!
//! # Example
//!
//! ```toml
//! [pipeline]
//! modbase_threads = 8
//! force_timeout_ms = 50
//!
//! [runner]
//! batch_size = 256
//!
//! [[callers]]
//! motif = "CG"
//! mod_bases = "m"
//! mod_long_names = ["5mC"]
//! base_mod_count = 1
//! ```

use crate::error::{ReadPipeError, Result};
use crate::modbase::ModBaseParams;
use crate::pipeline::nodes::ModBaseCallerOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default input queue capacity of the duplex tagging node
pub const DEFAULT_TAGGING_CAPACITY: usize = 1000;

/// Default number of modbase input threads
pub const DEFAULT_MODBASE_THREADS: usize = 4;

/// Default signal samples per move table entry
pub const DEFAULT_BLOCK_STRIDE: usize = 5;

/// Default modbase input queue capacity
pub const DEFAULT_MAX_READS: usize = 1000;

/// Default partial batch timeout in milliseconds
pub const DEFAULT_FORCE_TIMEOUT_MS: u64 = 100;

/// Default runner batch size
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Default tracing filter directive
pub const DEFAULT_LOG_FILTER: &str = "info,readpipe=debug";

// ==================== Pipeline Settings ====================

/// Per-node settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Route reads through the duplex tagging node
    pub duplex_tagging: bool,
    /// Input queue capacity of the duplex tagging node
    pub tagging_queue_capacity: usize,
    /// Number of modbase input (chunk generation) threads
    pub modbase_threads: usize,
    /// Signal samples per move table entry
    pub block_stride: usize,
    /// Modbase input queue capacity
    pub max_reads: usize,
    /// How long a partial batch waits before it is called anyway
    pub force_timeout_ms: u64,
    /// Capacity of the output channel feeding the writer
    pub output_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            duplex_tagging: true,
            tagging_queue_capacity: DEFAULT_TAGGING_CAPACITY,
            modbase_threads: DEFAULT_MODBASE_THREADS,
            block_stride: DEFAULT_BLOCK_STRIDE,
            max_reads: DEFAULT_MAX_READS,
            force_timeout_ms: DEFAULT_FORCE_TIMEOUT_MS,
            output_capacity: DEFAULT_MAX_READS,
        }
    }
}

impl PipelineSettings {
    pub fn force_timeout(&self) -> Duration {
        Duration::from_millis(self.force_timeout_ms)
    }

    /// Options for the modbase caller node
    pub fn modbase_options(&self) -> ModBaseCallerOptions {
        ModBaseCallerOptions {
            input_threads: self.modbase_threads,
            block_stride: self.block_stride,
            max_reads: self.max_reads,
            force_timeout: self.force_timeout(),
        }
    }
}

// ==================== Runner Settings ====================

/// Settings for the runners built by the command line tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Number of runners; each gets one batch worker per caller
    pub runner_count: usize,
    /// Chunks per inference call
    pub batch_size: usize,
    /// Modification probability reported by the prior runner
    pub mod_probability: f32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            runner_count: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            mod_probability: 0.0,
        }
    }
}

// ==================== Logging ====================

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
        }
    }
}

// ==================== Pipeline Config ====================

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: PipelineSettings,
    pub runner: RunnerSettings,
    /// Modification callers, one chunk queue each
    pub callers: Vec<ModBaseParams>,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings::default(),
            runner: RunnerSettings::default(),
            callers: vec![ModBaseParams::default()],
            logging: LoggingConfig::default(),
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

impl PipelineConfig {
    /// Load a config file, TOML or JSON by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReadPipeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                ReadPipeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                ReadPipeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save the config, TOML or JSON by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ReadPipeError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| ReadPipeError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| ReadPipeError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            ReadPipeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check the values a pipeline cannot be built from
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.tagging_queue_capacity == 0 {
            return Err(ReadPipeError::Config(
                "pipeline.tagging_queue_capacity must be positive".into(),
            ));
        }
        if p.modbase_threads == 0 {
            return Err(ReadPipeError::Config(
                "pipeline.modbase_threads must be positive".into(),
            ));
        }
        if p.block_stride == 0 {
            return Err(ReadPipeError::Config(
                "pipeline.block_stride must be positive".into(),
            ));
        }
        if p.max_reads == 0 {
            return Err(ReadPipeError::Config(
                "pipeline.max_reads must be positive".into(),
            ));
        }
        if p.output_capacity == 0 {
            return Err(ReadPipeError::Config(
                "pipeline.output_capacity must be positive".into(),
            ));
        }
        if self.runner.runner_count == 0 {
            return Err(ReadPipeError::Config(
                "runner.runner_count must be positive".into(),
            ));
        }
        if self.runner.batch_size == 0 {
            return Err(ReadPipeError::Config(
                "runner.batch_size must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.runner.mod_probability) {
            return Err(ReadPipeError::Config(format!(
                "runner.mod_probability {} is outside [0, 1]",
                self.runner.mod_probability
            )));
        }
        if self.callers.is_empty() {
            return Err(ReadPipeError::Config(
                "at least one caller must be configured".into(),
            ));
        }

        let mut seen = Vec::new();
        for (i, caller) in self.callers.iter().enumerate() {
            let base = caller
                .canonical_base()
                .map_err(|e| ReadPipeError::from(e).with_context(format!("callers[{i}]")))?;
            if seen.contains(&base) {
                return Err(ReadPipeError::Config(format!(
                    "callers[{i}] modifies '{}' which another caller already covers",
                    base as char
                )));
            }
            seen.push(base);
            if caller.context_samples() == 0 {
                return Err(ReadPipeError::Config(format!(
                    "callers[{i}] has an empty signal context"
                )));
            }
        }
        Ok(())
    }
}
