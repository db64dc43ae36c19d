use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::prelude::*;
use nestify::nest;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ANCHOR_FILE_NAME: &str = "posts_1.json";
pub const DEFAULT_MAX_SEARCH_DEPTH: usize = 5;
pub const DEFAULT_COMPLETION_MARKER: &str = "MIGRATION_COMPLETE";
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2_000;
pub const DEFAULT_SPAWN_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_RETENTION_SECS: u64 = 60 * 60;

nest! {
    #[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]*
    #[serde(rename_all = "kebab-case", default)]*
    /// Persistent configuration of the migration host.
    ///
    /// Stored at `~/.config/migration-host/config.yaml` (or `{config-name}.yaml`), every field
    /// is optional and falls back to its default. Load it with [`HostConfig::load`].
    pub struct HostConfig {
        pub extraction: pub struct ExtractionConfig {
            /// Name of the file whose position identifies the data root of the archive.
            pub anchor_file_name: String,
            pub max_search_depth: usize,
            /// Directories whose name contains one of these are searched first.
            pub priority_substrings: Vec<String>,
            /// Sub-folders of a single wrapper folder to prefer when the anchor is missing.
            pub wrapper_substrings: Vec<String>,
            pub activity_folder_name: String,
            pub media_folder_name: String,
        },
        pub worker: pub struct WorkerConfig {
            /// Entry point used when a request does not name a command.
            pub entry: Option<PathBuf>,
            /// Interpreter used to run `entry`, e.g. `node` for a script entry.
            pub interpreter: Option<String>,
            /// Directory relative entries and path-like variables are resolved against.
            pub app_root: Option<PathBuf>,
            pub completion_marker: String,
            /// Regular expression used instead of `completion_marker` when set.
            pub completion_pattern: Option<String>,
            pub grace_period_ms: u64,
            pub spawn_timeout_ms: u64,
            /// Additional variable names holding paths, on top of the `_PATH`/`_DIR`/... suffixes.
            pub path_variables: Vec<String>,
        },
        pub telemetry: pub struct TelemetryConfig {
            /// Ended operations older than this are purged from the tracker.
            pub retention_secs: u64,
            /// Error-tracking endpoint receiving failure reports as JSON.
            pub error_report_url: Option<String>,
        },
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            worker: WorkerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            anchor_file_name: DEFAULT_ANCHOR_FILE_NAME.into(),
            max_search_depth: DEFAULT_MAX_SEARCH_DEPTH,
            priority_substrings: ["instagram", "activity", "media", "posts", "content"]
                .map(String::from)
                .to_vec(),
            wrapper_substrings: ["instagram", "activity"].map(String::from).to_vec(),
            activity_folder_name: "your_instagram_activity".into(),
            media_folder_name: "media".into(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            entry: None,
            interpreter: None,
            app_root: None,
            completion_marker: DEFAULT_COMPLETION_MARKER.into(),
            completion_pattern: None,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            spawn_timeout_ms: DEFAULT_SPAWN_TIMEOUT_MS,
            path_variables: Vec::new(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_RETENTION_SECS,
            error_report_url: None,
        }
    }
}

impl WorkerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }
}

impl TelemetryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Get the path to the configuration file, following the XDG Base Directory Specification
/// at https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
///
/// If config_name is None, returns ~/.config/migration-host/config.yaml (default)
/// If config_name is Some, returns ~/.config/migration-host/{config_name}.yaml
fn get_configuration_file_path(config_name: Option<&str>) -> PathBuf {
    let config_dir = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| env::temp_dir());
            home.join(".config")
        });
    let config_dir = config_dir.join("migration-host");

    match config_name {
        Some(name) => config_dir.join(format!("{name}.yaml")),
        None => config_dir.join("config.yaml"),
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

impl HostConfig {
    /// Load the configuration. If it does not exist, return a default configuration.
    pub fn load(config_name: Option<&str>) -> Result<Self> {
        let config_path = get_configuration_file_path(config_name);

        let mut config = match fs::read(&config_path) {
            Ok(config_str) => {
                let config: HostConfig = serde_yaml::from_slice(&config_str).context(format!(
                    "Failed to parse host config at {}",
                    config_path.display()
                ))?;
                debug!("Config loaded from {}", config_path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                HostConfig::default()
            }
            Err(e) => bail!("Failed to load config: {e}"),
        };

        // A ~ may have made its way into the file without being expanded by a shell
        config.worker.entry = config.worker.entry.as_deref().map(expand_tilde);
        config.worker.app_root = config.worker.app_root.as_deref().map(expand_tilde);

        Ok(config)
    }

    /// Persist changes to the configuration
    pub fn persist(&self, config_name: Option<&str>) -> Result<()> {
        let config_path = get_configuration_file_path(config_name);
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_str = serde_yaml::to_string(self)?;
        fs::write(&config_path, config_str)?;
        debug!("Config written to {}", config_path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_var;

    #[test]
    fn test_load_missing_config_returns_defaults() {
        let config_home = tempfile::tempdir().unwrap();
        with_var("XDG_CONFIG_HOME", Some(config_home.path()), || {
            let config = HostConfig::load(None).unwrap();
            assert_eq!(config, HostConfig::default());
            assert_eq!(config.worker.grace_period(), Duration::from_secs(2));
            assert_eq!(config.worker.spawn_timeout(), Duration::from_secs(15));
            assert_eq!(config.extraction.max_search_depth, 5);
        });
    }

    #[test]
    fn test_load_partial_config() {
        let config_home = tempfile::tempdir().unwrap();
        let dir = config_home.path().join("migration-host");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("desktop.yaml"),
            "worker:\n  completion-marker: All done\n  grace-period-ms: 500\nextraction:\n  max-search-depth: 3\n",
        )
        .unwrap();

        with_var("XDG_CONFIG_HOME", Some(config_home.path()), || {
            let config = HostConfig::load(Some("desktop")).unwrap();
            assert_eq!(config.worker.completion_marker, "All done");
            assert_eq!(config.worker.grace_period(), Duration::from_millis(500));
            assert_eq!(config.worker.spawn_timeout_ms, DEFAULT_SPAWN_TIMEOUT_MS);
            assert_eq!(config.extraction.max_search_depth, 3);
            assert_eq!(config.extraction.anchor_file_name, DEFAULT_ANCHOR_FILE_NAME);
        });
    }

    #[test]
    fn test_load_invalid_config_fails() {
        let config_home = tempfile::tempdir().unwrap();
        let dir = config_home.path().join("migration-host");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.yaml"), "worker: [not, a, map]\n").unwrap();

        with_var("XDG_CONFIG_HOME", Some(config_home.path()), || {
            let err = HostConfig::load(None).unwrap_err();
            assert!(err.to_string().starts_with("Failed to parse host config at"));
        });
    }

    #[test]
    fn test_persist_then_load() {
        let config_home = tempfile::tempdir().unwrap();
        with_var("XDG_CONFIG_HOME", Some(config_home.path()), || {
            let mut config = HostConfig::default();
            config.worker.interpreter = Some("node".into());
            config.telemetry.error_report_url = Some("https://errors.example.com/report".into());
            config.persist(None).unwrap();

            assert_eq!(HostConfig::load(None).unwrap(), config);
        });
    }
}
