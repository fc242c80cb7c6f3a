pub mod check;
pub mod config_cmd;
pub mod run;

use std::path::Path;

use folio_config::{AppConfig, ConfigError};

/// Load config from `path` (or the default location), then apply
/// environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        None => AppConfig::load(),
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
    }
}
