use anyhow::Context;

use crate::config::model::Config;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "waypoint.toml";

pub fn load_config_from_path(config_path: &str) -> Result<Config, anyhow::Error> {
    let config_str = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file '{}'", config_path))?;
    let config: Config = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file '{}'", config_path))?;
    tracing::debug!(
        "Loaded config from {}: {} services",
        config_path,
        config.services.len()
    );
    Ok(config)
}
