//! Layered configuration for the watcher and the recognition workers.
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - TOML configuration file (`.ocrdrop/settings.toml` or `--config`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `OCRDROP_` and use double
//! underscores to separate nested levels:
//! - `OCRDROP_PATHS__WATCH_ROOT=/srv/in` sets `paths.watch_root`
//! - `OCRDROP_WATCH__FOLLOW_LINKS=true` sets `watch.follow_links`
//! - `OCRDROP_RECOGNITION__TEXT_MIN_CHARS=32` sets `recognition.text_min_chars`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding the settings file, searched upwards from the current directory.
pub const CONFIG_DIR: &str = ".ocrdrop";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "OCRDROP_";

/// Startup configuration errors. These are fatal for the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Watch root {path} is not usable: {reason}")]
    InvalidWatchRoot { path: PathBuf, reason: String },

    #[error("'{setting}' ({path}) must not be inside the watch root")]
    InsideWatchRoot {
        setting: &'static str,
        path: PathBuf,
    },

    #[error("Invalid setting '{setting}': {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PathsConfig {
    /// Directory tree watched for incoming documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_root: Option<PathBuf>,

    /// Root of the mirrored output tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,

    /// Where diagnostic records for failed inputs are written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_dir: Option<PathBuf>,

    /// Directory for the rolling diagnostic log. Stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Spool directory shared by the watcher and the workers.
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Directory and file names never entered or enqueued (case-insensitive).
    #[serde(default = "default_excluded_names")]
    pub excluded_names: Vec<String>,

    /// Descend into symlinks, junctions and mount points.
    #[serde(default)]
    pub follow_links: bool,

    /// Extensions (without dot, case-insensitive) that are enqueued.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Consecutive identical samples needed to call a file stable.
    #[serde(default = "default_stable_samples")]
    pub stable_samples: u32,

    /// Maximum number of re-samples before giving up on a file for this pass.
    #[serde(default = "default_stabilize_retries")]
    pub stabilize_retries: u32,

    /// Delay between samples in milliseconds.
    #[serde(default = "default_stabilize_step_ms")]
    pub stabilize_step_ms: u64,

    /// Interval between full re-scans of the watch root, in seconds.
    #[serde(default = "default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,

    /// Delay before scanning a newly created directory, in milliseconds.
    #[serde(default = "default_dir_settle_ms")]
    pub dir_settle_ms: u64,

    /// Quiet period applied to change notifications, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound on candidates being stabilized/enqueued concurrently.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecognitionConfig {
    /// Recognition languages, joined with '+' for the engine.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Extra engine arguments, whitespace separated.
    #[serde(default = "default_engine_options")]
    pub engine_options: String,

    /// Rasterization resolution for scan pages.
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Minimum trimmed characters for a page's text layer to be trusted.
    #[serde(default = "default_text_min_chars")]
    pub text_min_chars: usize,

    /// Scan pages recognized concurrently within one document.
    #[serde(default = "default_page_threads")]
    pub page_threads: usize,

    /// Per-call timeout for external tools, in seconds.
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,

    /// Tesseract executable.
    #[serde(default = "default_tesseract")]
    pub tesseract: PathBuf,

    /// Directory holding the poppler utilities. Resolved from PATH when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poppler_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Write a normalized `.txt` artifact.
    #[serde(default = "default_true")]
    pub text: bool,

    /// Write a searchable `.pdf` artifact.
    #[serde(default = "default_true")]
    pub pdf: bool,

    /// Append a short hash of the input path to output names.
    #[serde(default)]
    pub hash_suffix: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    /// Worker threads started by `ocrdrop work`.
    #[serde(default = "default_worker_threads")]
    pub threads: usize,

    /// Hard limit for one work item, in seconds.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// How long an idle worker waits on the queue per poll, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Copy failed inputs into the error directory next to their record.
    #[serde(default)]
    pub copy_failed_inputs: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    /// Claimed items not acknowledged within this many seconds are redelivered.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug or trace.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `watcher = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("queue")
}
fn default_excluded_names() -> Vec<String> {
    ["$recycle.bin", "System Volume Information", "__pycache__", ".git"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_extensions() -> Vec<String> {
    ["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_stable_samples() -> u32 {
    2
}
fn default_stabilize_retries() -> u32 {
    40
}
fn default_stabilize_step_ms() -> u64 {
    500
}
fn default_rescan_interval_secs() -> u64 {
    300
}
fn default_dir_settle_ms() -> u64 {
    2000
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_max_parallel() -> usize {
    num_cpus::get().max(2)
}
fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}
fn default_engine_options() -> String {
    "--psm 6".to_string()
}
fn default_dpi() -> u32 {
    300
}
fn default_text_min_chars() -> usize {
    16
}
fn default_page_threads() -> usize {
    2
}
fn default_engine_timeout_secs() -> u64 {
    900
}
fn default_tesseract() -> PathBuf {
    PathBuf::from("tesseract")
}
fn default_true() -> bool {
    true
}
fn default_worker_threads() -> usize {
    1
}
fn default_max_duration_secs() -> u64 {
    8 * 60 * 60
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_visibility_timeout_secs() -> u64 {
    default_max_duration_secs() + 30 * 60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            watch_root: None,
            output_root: None,
            error_dir: None,
            log_dir: None,
            queue_dir: default_queue_dir(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            excluded_names: default_excluded_names(),
            follow_links: false,
            extensions: default_extensions(),
            stable_samples: default_stable_samples(),
            stabilize_retries: default_stabilize_retries(),
            stabilize_step_ms: default_stabilize_step_ms(),
            rescan_interval_secs: default_rescan_interval_secs(),
            dir_settle_ms: default_dir_settle_ms(),
            debounce_ms: default_debounce_ms(),
            max_parallel: default_max_parallel(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            engine_options: default_engine_options(),
            dpi: default_dpi(),
            text_min_chars: default_text_min_chars(),
            page_threads: default_page_threads(),
            engine_timeout_secs: default_engine_timeout_secs(),
            tesseract: default_tesseract(),
            poppler_dir: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            text: true,
            pdf: true,
            hash_suffix: false,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: default_worker_threads(),
            max_duration_secs: default_max_duration_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            copy_failed_inputs: false,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

/// Required paths after validation.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub watch_root: PathBuf,
    pub output_root: PathBuf,
    pub error_dir: PathBuf,
    pub queue_dir: PathBuf,
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file (missing files are allowed).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Find the nearest `.ocrdrop/settings.toml`, searching upwards.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Validate settings before starting a long-running service.
    ///
    /// Every error here is a startup error, never a per-item failure.
    pub fn validate(&self) -> Result<ResolvedPaths, ConfigError> {
        let watch_root = self
            .paths
            .watch_root
            .clone()
            .ok_or(ConfigError::Missing("paths.watch_root"))?;
        let output_root = self
            .paths
            .output_root
            .clone()
            .ok_or(ConfigError::Missing("paths.output_root"))?;
        let error_dir = self
            .paths
            .error_dir
            .clone()
            .ok_or(ConfigError::Missing("paths.error_dir"))?;

        let meta =
            std::fs::symlink_metadata(&watch_root).map_err(|e| ConfigError::InvalidWatchRoot {
                path: watch_root.clone(),
                reason: e.to_string(),
            })?;
        if meta.file_type().is_symlink() {
            return Err(ConfigError::InvalidWatchRoot {
                path: watch_root,
                reason: "is a link, point the setting at the real directory".to_string(),
            });
        }
        if !meta.is_dir() {
            return Err(ConfigError::InvalidWatchRoot {
                path: watch_root,
                reason: "not a directory".to_string(),
            });
        }
        let watch_root = watch_root.canonicalize()?;

        let output_root = absolutize(&output_root)?;
        let error_dir = absolutize(&error_dir)?;
        if output_root.starts_with(&watch_root) {
            return Err(ConfigError::InsideWatchRoot {
                setting: "paths.output_root",
                path: output_root,
            });
        }
        if error_dir.starts_with(&watch_root) {
            return Err(ConfigError::InsideWatchRoot {
                setting: "paths.error_dir",
                path: error_dir,
            });
        }

        if !self.output.text && !self.output.pdf {
            return Err(ConfigError::Invalid {
                setting: "output",
                reason: "at least one of output.text / output.pdf must be enabled".to_string(),
            });
        }
        if self.watch.stable_samples < 2 {
            return Err(ConfigError::Invalid {
                setting: "watch.stable_samples",
                reason: "needs at least two samples to compare".to_string(),
            });
        }
        if self.recognition.languages.is_empty() {
            return Err(ConfigError::Missing("recognition.languages"));
        }
        for lang in &self.recognition.languages {
            crate::recognition::engine::validate_language(lang).map_err(|reason| {
                ConfigError::Invalid {
                    setting: "recognition.languages",
                    reason,
                }
            })?;
        }

        Ok(ResolvedPaths {
            watch_root,
            output_root,
            error_dir,
            queue_dir: absolutize(&self.paths.queue_dir)?,
        })
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file under `.ocrdrop/` in the current directory.
    pub fn init_config_file(force: bool) -> Result<PathBuf, ConfigError> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(ConfigError::Invalid {
                setting: "init",
                reason: "configuration file already exists, use --force to overwrite".to_string(),
            });
        }

        let mut settings = Settings::default();
        if let Ok(current_dir) = std::env::current_dir() {
            settings.paths.watch_root = Some(current_dir.join("in"));
            settings.paths.output_root = Some(current_dir.join("out"));
            settings.paths.error_dir = Some(current_dir.join("err"));
            settings.paths.log_dir = Some(current_dir.join("logs"));
        }

        settings.save(&config_path)?;
        Ok(config_path)
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
