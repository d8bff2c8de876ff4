//! Configuration for the streampack pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STREAMPACK_HOME, STREAMPACK_WORKDIR, STREAMPACK_FFMPEG)
//! 2. Config file (.streampack/config.yaml)
//! 3. Defaults (~/.streampack)
//!
//! Config file discovery:
//! - Searches current directory and parents for .streampack/config.yaml
//! - Paths in config file are relative to the config file's parent directory
//!
//! The resolved configuration is built once at process start and passed by
//! reference to the orchestrator; nothing reads configuration mid-run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::classify::CategoryRule;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: Option<PipelineSettings>,
    /// Ordered classification rule table; the first matching rule wins
    #[serde(default)]
    pub classification: Option<Vec<CategoryRule>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Working directory root for in-flight runs (relative to config file)
    pub workdir: Option<String>,
}

/// Pipeline tunables as they appear in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    pub max_concurrent_transcodes: Option<usize>,
    pub transcode_timeout_seconds: Option<u64>,
    pub progress_interval_seconds: Option<u64>,
    pub max_upload_bytes: Option<u64>,
    pub ffmpeg_path: Option<String>,
    pub transcode_retry: Option<RetryPolicy>,
    pub delivery_retry: Option<RetryPolicy>,
}

/// Retry policy for failed stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute path to streampack home (engine state)
    pub home: PathBuf,
    /// Root under which per-run working directories are created
    pub workdir_root: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,
    /// Maximum simultaneous transcode workers
    pub max_concurrent_transcodes: usize,
    /// Wall-clock limit per transcode invocation
    pub transcode_timeout_seconds: u64,
    /// Minimum seconds between progress updates on the status channel
    pub progress_interval_seconds: u64,
    /// Upload size ceiling; larger payloads fail permanently without retry
    pub max_upload_bytes: u64,
    /// Retry budget for transcoding (default: one retry)
    pub transcode_retry: RetryPolicy,
    /// Retry budget for delivery (default: two retries with backoff)
    pub delivery_retry: RetryPolicy,
    /// Ordered classification rule table (None = built-in default table)
    pub classification: Option<Vec<CategoryRule>>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

fn default_transcode_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay_ms: 2000,
        ..Default::default()
    }
}

fn default_delivery_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        ..Default::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".streampack");

        Self {
            workdir_root: home.join("work"),
            home,
            ffmpeg_path: "ffmpeg".to_string(),
            max_concurrent_transcodes: 3,
            transcode_timeout_seconds: 300,
            progress_interval_seconds: 4,
            max_upload_bytes: 50 * 1024 * 1024,
            transcode_retry: default_transcode_retry(),
            delivery_retry: default_delivery_retry(),
            classification: None,
            config_file: None,
        }
    }
}

impl Config {
    /// Wall-clock limit per transcode as a Duration
    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_seconds)
    }

    /// Minimum interval between progress updates
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_seconds)
    }

    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = find_config_file() {
            let file = load_config_file(&config_path)?;

            // Base directory is the parent of .streampack/
            let base_dir = config_path
                .parent() // .streampack/
                .and_then(|p| p.parent()) // project root
                .unwrap_or(Path::new("."));

            if let Some(ref home_path) = file.paths.home {
                // home is relative to the .streampack/ directory
                let streampack_dir = config_path.parent().unwrap_or(Path::new("."));
                config.home = resolve_path(streampack_dir, home_path);
                config.workdir_root = config.home.join("work");
            }
            if let Some(ref workdir_path) = file.paths.workdir {
                config.workdir_root = resolve_path(base_dir, workdir_path);
            }

            if let Some(pipeline) = file.pipeline {
                if let Some(n) = pipeline.max_concurrent_transcodes {
                    config.max_concurrent_transcodes = n.max(1);
                }
                if let Some(secs) = pipeline.transcode_timeout_seconds {
                    config.transcode_timeout_seconds = secs;
                }
                if let Some(secs) = pipeline.progress_interval_seconds {
                    config.progress_interval_seconds = secs;
                }
                if let Some(bytes) = pipeline.max_upload_bytes {
                    config.max_upload_bytes = bytes;
                }
                if let Some(path) = pipeline.ffmpeg_path {
                    config.ffmpeg_path = path;
                }
                if let Some(policy) = pipeline.transcode_retry {
                    config.transcode_retry = policy;
                }
                if let Some(policy) = pipeline.delivery_retry {
                    config.delivery_retry = policy;
                }
            }

            config.classification = file.classification;
            config.config_file = Some(config_path);
        }

        // Environment variables take precedence over the config file
        if let Ok(env_home) = std::env::var("STREAMPACK_HOME") {
            config.home = PathBuf::from(env_home);
            config.workdir_root = config.home.join("work");
        }
        if let Ok(env_workdir) = std::env::var("STREAMPACK_WORKDIR") {
            config.workdir_root = PathBuf::from(env_workdir);
        }
        if let Ok(env_ffmpeg) = std::env::var("STREAMPACK_FFMPEG") {
            config.ffmpeg_path = env_ffmpeg;
        }

        Ok(config)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".streampack").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}
