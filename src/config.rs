use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub credentials_path: PathBuf,
    pub output_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            project_id: std::env::var("VERTEX_AI_PROJECT_ID")
                .context("VERTEX_AI_PROJECT_ID must be set")?,
            credentials_path: std::env::var("VERTEX_AI_SERVICE_ACCOUNT_JSON")
                .context("VERTEX_AI_SERVICE_ACCOUNT_JSON must be set")?
                .into(),
            output_dir: std::env::var("OUTPUT_DIR")
                .unwrap_or_else(|_| "output/advanced_test".into())
                .into(),
        })
    }
}
