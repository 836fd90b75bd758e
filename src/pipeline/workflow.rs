use crate::auth::{ServiceAccountKey, TokenProvider};
use crate::config::Config;
use crate::services::veo::{FrameImage, VeoClient, VideoArtifact};
use crate::services::{gemini, veo};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BASE_IMAGE_PROMPT: &str = "A young professional person with short dark hair sitting at a modern desk with a laptop, looking at the screen, office environment with warm lighting, photorealistic high quality image";

const VARIATION_PROMPT: &str = "Generate a new image of the exact same person from the reference image, but now they are standing next to the desk with arms raised in a celebratory pose. Keep the same office environment, same lighting, same person appearance. Photorealistic high quality.";

const VIDEO_PROMPT: &str = "The person smoothly transitions from sitting to standing while doing a celebratory dance move, continuous fluid motion, same office environment";

pub struct WorkflowOutcome {
    pub base_image: PathBuf,
    pub variation_image: PathBuf,
    pub video: Option<VideoOutcome>,
}

#[derive(Debug)]
pub enum VideoOutcome {
    File(PathBuf),
    Remote(String),
}

impl std::fmt::Display for VideoOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoOutcome::File(path) => write!(f, "{}", path.display()),
            VideoOutcome::Remote(uri) => write!(f, "{} (remote)", uri),
        }
    }
}

/// Full three-step pipeline:
/// 1. Gemini: prompt -> base image (person sitting at desk)
/// 2. Gemini: base image + prompt -> variation (person standing)
/// 3. Veo: both images as first/last frame -> dancing transition video
///
/// Steps 1 and 2 abort the process on failure; a step-3 failure is logged
/// and reported as a missing video.
pub async fn run(config: &Config) -> Result<WorkflowOutcome> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating output dir {}", config.output_dir.display()))?;
    tracing::info!("Output directory: {}", config.output_dir.display());

    let key = ServiceAccountKey::from_file(&config.credentials_path).with_context(|| {
        format!(
            "reading service account key {}",
            config.credentials_path.display()
        )
    })?;
    let auth = Arc::new(TokenProvider::new(key));

    let image_client = gemini::GeminiClient::new(&config.project_id, auth.clone())?;
    let video_client = VeoClient::new(&config.project_id, auth)?;

    // Step 1: base image
    tracing::info!("STEP 1: Generate base image (person sitting at desk)");
    tracing::info!("Model: {} ({})", gemini::IMAGE_MODEL, gemini::IMAGE_LOCATION);
    let base_image = config.output_dir.join("step1_sitting.png");
    let result = image_client
        .generate_image(BASE_IMAGE_PROMPT, None)
        .await
        .context("base image generation failed")?;
    gemini::save_image(&result.bytes, &base_image)?;

    // Step 2: variation conditioned on step 1's file
    tracing::info!("STEP 2: Generate variation (same person, now standing)");
    let reference = std::fs::read(&base_image)
        .with_context(|| format!("reading base image {}", base_image.display()))?;
    tracing::info!("Base image loaded: {} bytes", reference.len());

    let variation_image = config.output_dir.join("step2_standing.png");
    let result = image_client
        .generate_image(VARIATION_PROMPT, Some(&reference))
        .await
        .context("variation image generation failed")?;
    gemini::save_image(&result.bytes, &variation_image)?;

    // Step 3: transition video, failure tolerated
    tracing::info!("STEP 3: Generate transition video (dancing animation)");
    tracing::info!("Model: {} ({})", veo::VIDEO_MODEL, veo::VIDEO_LOCATION);
    let video = video_or_none(
        generate_video(&video_client, &base_image, &variation_image, &config.output_dir).await,
    );

    Ok(WorkflowOutcome {
        base_image,
        variation_image,
        video,
    })
}

/// A failed video step is logged and collapsed to `None`; the workflow
/// itself still succeeds and the process exits zero.
fn video_or_none(result: Result<VideoOutcome>) -> Option<VideoOutcome> {
    match result {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!("Video generation failed: {:#}", e);
            None
        }
    }
}

async fn generate_video(
    client: &VeoClient,
    first_frame: &Path,
    last_frame: &Path,
    output_dir: &Path,
) -> Result<VideoOutcome> {
    let first = FrameImage::from_file(first_frame)?;
    let last = FrameImage::from_file(last_frame)?;

    tracing::info!("First frame: {}", first_frame.display());
    tracing::info!("Last frame: {}", last_frame.display());
    tracing::info!("Generating video (2-3 minutes)...");

    let operation = client.submit(VIDEO_PROMPT, first, last).await?;
    tracing::info!("Operation: {}", operation.name);

    let operation = client.await_completion(operation).await?;
    let video = operation.into_video()?;

    match video.into_artifact()? {
        VideoArtifact::Bytes(bytes) => {
            let path = output_dir.join("step3_dance_transition.mp4");
            std::fs::write(&path, &bytes)
                .with_context(|| format!("writing video {}", path.display()))?;
            tracing::info!("Saved video: {} ({}KB)", path.display(), bytes.len() / 1024);
            Ok(VideoOutcome::File(path))
        }
        VideoArtifact::Remote(uri) => {
            tracing::info!("Video stored remotely: {}", uri);
            Ok(VideoOutcome::Remote(uri))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ServiceAccountKey, TokenProvider};

    fn offline_client() -> VeoClient {
        let key = ServiceAccountKey {
            client_email: "robot@test-project.iam.gserviceaccount.com".into(),
            private_key: String::new(),
            token_uri: "https://oauth2.googleapis.com/token".into(),
        };
        VeoClient::new("test-project", Arc::new(TokenProvider::new(key))).unwrap()
    }

    #[tokio::test]
    async fn failed_video_step_collapses_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing_frame = dir.path().join("step1_sitting.png");
        let client = offline_client();

        let result = generate_video(&client, &missing_frame, &missing_frame, dir.path()).await;
        assert!(result.is_err());

        assert!(video_or_none(result).is_none());
        assert!(!dir.path().join("step3_dance_transition.mp4").exists());
    }

    #[test]
    fn successful_video_step_passes_through() {
        let outcome = video_or_none(Ok(VideoOutcome::Remote("gs://bucket/video.mp4".into())));
        assert!(matches!(outcome, Some(VideoOutcome::Remote(_))));
    }
}
