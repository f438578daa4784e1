mod settings;

pub use settings::{Config, TomlConfig, TomlExportConfig, TomlTrackingConfig, EXAMPLE_CONFIG};
