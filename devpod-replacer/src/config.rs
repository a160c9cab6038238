use devpod_config::load_config;
use devpod_config::shared::ReplacerConfig;

/// Loads the [`ReplacerConfig`] and validates it.
pub fn load_replacer_config() -> anyhow::Result<ReplacerConfig> {
    let config = load_config::<ReplacerConfig>()?;
    config.validate()?;

    Ok(config)
}
