use crate::config::load_replacer_config;
use crate::core::start_replacer_with_config;
use devpod_config::shared::ReplacerConfig;
use devpod_telemetry::init_tracing;
use tracing::error;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    // Load replacer config
    let replacer_config = load_replacer_config()?;

    // Initialize tracing with the project the dev pods belong to
    let _log_flusher =
        init_tracing(env!("CARGO_BIN_NAME"), replacer_config.project.clone())?;

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(replacer_config))?;

    Ok(())
}

async fn async_main(replacer_config: ReplacerConfig) -> anyhow::Result<()> {
    if let Err(err) = start_replacer_with_config(replacer_config).await {
        error!("an error occurred in the replacer: {err}");

        return Err(err);
    }

    Ok(())
}
