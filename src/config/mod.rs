mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BackendKind, LoggingSettings, PubSubSettings, Settings};

/// Base name of the optional configuration file, resolved against the
/// working directory (`config/default.toml`, `.yaml`, `.json`, ...).
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Prefix of the environment variables that override file settings, e.g.
/// `LIVESUB_PUBSUB__BACKEND=redis`.
pub const ENV_PREFIX: &str = "LIVESUB";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Like [`load_config`] but reads the file named `base` (extension optional).
pub fn load_config_from(base: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(base).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}
