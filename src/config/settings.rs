use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, TrackerError};
use crate::export::ExportFormat;
use crate::measure::{MeasureGroup, MeasureRequest};
use crate::provider::LogLevel;
use crate::session::{TrackingConfig, DEFAULT_METADATA_DIR_NAME};
use crate::util::paths::config_path;

/// Example configuration file contents
pub const EXAMPLE_CONFIG: &str = r#"# tirex-tracker configuration

[tracking]
# Poll interval of the monitor thread in milliseconds
# poll_interval_ms = 100
# Measure groups tracked when no measures are given explicitly
# groups = ["git", "system", "energy", "gpu"]
# Provider log severity at which the tracked work is aborted
# abort_threshold = "critical"

[export]
# Directory next to the export holding code archives
# metadata_dir = ".tirex-tracker"
# Export format; auto-detected from the file name when unset
# format = "ir_metadata"
"#;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Poll interval handed to the provider
    pub poll_interval_ms: i64,
    /// Groups tracked by default
    pub groups: Vec<MeasureGroup>,
    /// Provider severity that aborts the tracked work
    pub abort_threshold: LogLevel,
    /// Name of the directory holding per-export code archives
    pub metadata_dir_name: String,
    /// None means auto-detect from the export file name
    pub export_format: Option<ExportFormat>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            groups: vec![
                MeasureGroup::Git,
                MeasureGroup::System,
                MeasureGroup::Energy,
                MeasureGroup::Gpu,
            ],
            abort_threshold: LogLevel::Critical,
            metadata_dir_name: DEFAULT_METADATA_DIR_NAME.to_string(),
            export_format: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlTrackingConfig {
    pub poll_interval_ms: Option<i64>,
    pub groups: Option<Vec<String>>,
    pub abort_threshold: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlExportConfig {
    pub metadata_dir: Option<String>,
    pub format: Option<String>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub tracking: Option<TomlTrackingConfig>,
    pub export: Option<TomlExportConfig>,
}

impl Config {
    /// Load `~/.tirex-tracker/config.toml` on top of the defaults.
    ///
    /// A missing or unreadable file leaves the defaults in place.
    pub fn load() -> Self {
        let config_file = config_path();
        if !config_file.exists() {
            return Config::default();
        }
        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %config_file.display(),
                    error = %e,
                    "Ignoring invalid config file"
                );
                Config::default()
            }
        }
    }

    /// Load an explicit config file. Errors are returned, not ignored.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let toml_config = toml::from_str::<TomlConfig>(&contents).map_err(|e| {
            TrackerError::InvalidArgument(format!("{}: {}", path.display(), e))
        })?;
        let mut config = Config::default();
        config.merge(toml_config)?;
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) -> Result<()> {
        if let Some(tracking) = toml_config.tracking {
            if let Some(interval) = tracking.poll_interval_ms {
                if interval == 0 {
                    return Err(TrackerError::InvalidArgument(
                        "poll_interval_ms must not be 0".to_string(),
                    ));
                }
                self.poll_interval_ms = interval;
            }
            if let Some(groups) = tracking.groups {
                self.groups = groups
                    .iter()
                    .map(|g| g.parse())
                    .collect::<Result<Vec<MeasureGroup>>>()?;
            }
            if let Some(level) = tracking.abort_threshold {
                self.abort_threshold = level.parse()?;
            }
        }

        if let Some(export) = toml_config.export {
            if let Some(dir) = export.metadata_dir {
                if dir.trim().is_empty() {
                    return Err(TrackerError::InvalidArgument(
                        "metadata_dir must not be empty".to_string(),
                    ));
                }
                self.metadata_dir_name = dir;
            }
            if let Some(format) = export.format {
                self.export_format = Some(format.parse()?);
            }
        }
        Ok(())
    }

    /// Measures of the configured default groups
    pub fn default_measures(&self) -> Result<MeasureRequest> {
        MeasureRequest::from_groups(self.groups.iter().map(|g| g.as_str()))
    }

    /// Apply the configured defaults to a session config.
    pub fn apply(&self, mut tracking: TrackingConfig) -> TrackingConfig {
        tracking.poll_interval_ms = self.poll_interval_ms;
        tracking.abort_threshold = self.abort_threshold;
        tracking.metadata_dir_name = self.metadata_dir_name.clone();
        if tracking.export_format.is_none() {
            tracking.export_format = self.export_format;
        }
        tracking
    }
}
