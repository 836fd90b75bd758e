mod auth;
mod config;
mod error;
mod pipeline;
mod services;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "veoflow=info".into()),
        )
        .init();

    // Missing required env vars abort here with a non-zero exit.
    let config = Config::from_env()?;

    tracing::info!("ADVANCED WORKFLOW: sitting -> standing -> dance transition");
    tracing::info!("Project: {}", config.project_id);

    let outcome = pipeline::workflow::run(&config).await?;

    tracing::info!("WORKFLOW COMPLETE");
    tracing::info!("Base image: {}", outcome.base_image.display());
    tracing::info!("Variation: {}", outcome.variation_image.display());
    match &outcome.video {
        Some(video) => tracing::info!("Video: {}", video),
        None => tracing::info!("Video: none (generation failed)"),
    }

    Ok(())
}
