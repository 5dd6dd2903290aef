use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Queue and worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of items waiting in the queue
    pub queue_capacity: usize,
    /// Number of concurrent workers
    pub worker_count: usize,
    /// Jobs handed to the engine per batch
    pub batch_size: usize,
    /// Delay before the first watchdog check (milliseconds)
    pub watchdog_initial_delay_ms: u64,
    /// Interval between watchdog checks (milliseconds)
    pub watchdog_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5000,
            worker_count: 4,
            batch_size: 8,
            watchdog_initial_delay_ms: 2_000,
            watchdog_interval_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn watchdog_initial_delay(&self) -> Duration {
        Duration::from_millis(self.watchdog_initial_delay_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

/// External rendering engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpreter used to run the engine script
    pub interpreter: String,
    /// Arguments passed to the interpreter for the availability probe
    pub probe_args: Vec<String>,
    /// Path to the rendering script
    pub script: PathBuf,
    /// Parallelism hint passed to the engine in batch mode
    pub concurrency: usize,
    /// Thumbnail edge length in pixels
    pub thumbnail_size: u32,
    /// Timeout for a single-item render (seconds)
    pub single_timeout_secs: u64,
    /// Timeout for a single-item render of a large input (seconds)
    pub large_file_timeout_secs: u64,
    /// Inputs above this size get the large-file timeout (bytes)
    pub large_file_threshold: u64,
    /// Fixed part of the batch timeout (seconds)
    pub batch_base_timeout_secs: u64,
    /// Added to the batch timeout for every job in the batch (seconds)
    pub batch_item_timeout_secs: u64,
    /// How long to keep reading buffered output after killing a timed-out batch (milliseconds)
    pub salvage_grace_ms: u64,
    /// How long an availability probe result stays valid (seconds)
    pub availability_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter().to_string(),
            probe_args: vec!["--version".to_string()],
            script: PathBuf::from("scripts/stl_thumbnail_batch.py"),
            concurrency: 4,
            thumbnail_size: 256,
            single_timeout_secs: 30,
            large_file_timeout_secs: 120,
            large_file_threshold: 50 * 1024 * 1024,
            batch_base_timeout_secs: 60,
            batch_item_timeout_secs: 15,
            salvage_grace_ms: 500,
            availability_ttl_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Timeout for a single-item call on an input of the given size
    pub fn single_timeout(&self, input_size: Option<u64>) -> Duration {
        match input_size {
            Some(size) if size > self.large_file_threshold => {
                Duration::from_secs(self.large_file_timeout_secs)
            }
            _ => Duration::from_secs(self.single_timeout_secs),
        }
    }

    /// Timeout for a streaming batch of `jobs` jobs
    pub fn batch_timeout(&self, jobs: usize) -> Duration {
        Duration::from_secs(self.batch_base_timeout_secs)
            + Duration::from_secs(self.batch_item_timeout_secs) * jobs as u32
    }

    pub fn salvage_grace(&self) -> Duration {
        Duration::from_millis(self.salvage_grace_ms)
    }

    pub fn availability_ttl(&self) -> Duration {
        Duration::from_secs(self.availability_ttl_secs)
    }
}

#[cfg(windows)]
fn default_interpreter() -> &'static str {
    "python"
}

#[cfg(not(windows))]
fn default_interpreter() -> &'static str {
    "python3"
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory where thumbnails are written
    pub thumbnail_dir: PathBuf,
    /// Thumbnail file extension
    pub extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            thumbnail_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("thumbnailer")
                .join("thumbnails"),
            extension: "png".to_string(),
        }
    }
}
