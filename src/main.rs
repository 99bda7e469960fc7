use anyhow::{Context, Result};
use clap::Parser;
use tracing::Instrument;

use platform_core::config::Config;
use platform_core::{host_api, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    logging::init(&config.log_level, config.log_format)
        .context("failed to install the log subscriber")?;

    let span = logging::service_span(&config.service_info());

    if config.uses_fallback_secret() {
        span.in_scope(|| {
            tracing::warn!("JWT_SECRET not set, signing with the built-in fallback secret");
        });
    }

    host_api::serve(config)
        .instrument(span.clone())
        .await
        .inspect_err(|e| {
            span.in_scope(|| tracing::error!(error = %e, "Failed to start server"));
        })?;

    Ok(())
}
