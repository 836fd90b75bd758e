use crate::auth::TokenProvider;
use crate::error::ApiError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const VIDEO_MODEL: &str = "veo-3.1-generate-001";

// Veo is regional; it is not served from the global endpoint.
pub const VIDEO_LOCATION: &str = "us-central1";

pub const POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Serialize)]
struct VideoRequest {
    instances: Vec<VideoInstance>,
    parameters: VideoParameters,
}

#[derive(Serialize)]
struct VideoInstance {
    prompt: String,
    image: FrameImage,
    #[serde(rename = "lastFrame")]
    last_frame: FrameImage,
}

/// An inline image used as first/last frame conditioning.
#[derive(Serialize, Clone)]
pub struct FrameImage {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64_encoded: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

impl FrameImage {
    pub fn from_file(path: &Path) -> Result<Self, ApiError> {
        let bytes = std::fs::read(path)?;
        tracing::debug!("Loaded frame {} ({}KB)", path.display(), bytes.len() / 1024);
        Ok(FrameImage {
            bytes_base64_encoded: base64::engine::general_purpose::STANDARD.encode(&bytes),
            mime_type: "image/png".into(),
        })
    }
}

#[derive(Serialize)]
struct VideoParameters {
    #[serde(rename = "aspectRatio")]
    aspect_ratio: String,
    #[serde(rename = "durationSeconds")]
    duration_seconds: u32,
    #[serde(rename = "generateAudio")]
    generate_audio: bool,
    resolution: String,
}

/// A long-running video generation job, as returned by `predictLongRunning`
/// and refreshed by `fetchPredictOperation`.
#[derive(Deserialize, Debug)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    pub error: Option<OperationError>,
    pub response: Option<VideoResponse>,
}

#[derive(Deserialize, Debug)]
pub struct OperationError {
    pub code: Option<i64>,
    pub message: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct VideoResponse {
    #[serde(default)]
    pub videos: Vec<GeneratedVideo>,
}

#[derive(Deserialize, Debug)]
pub struct GeneratedVideo {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64_encoded: Option<String>,
    #[serde(rename = "gcsUri")]
    gcs_uri: Option<String>,
}

/// What a finished operation actually handed back: inline bytes, or a
/// pointer into cloud storage when the service stored the file remotely.
pub enum VideoArtifact {
    Bytes(Vec<u8>),
    Remote(String),
}

impl GeneratedVideo {
    pub fn into_artifact(self) -> Result<VideoArtifact, ApiError> {
        if let Some(b64) = self.bytes_base64_encoded {
            let bytes = base64::engine::general_purpose::STANDARD.decode(b64)?;
            return Ok(VideoArtifact::Bytes(bytes));
        }
        if let Some(uri) = self.gcs_uri {
            return Ok(VideoArtifact::Remote(uri));
        }
        Err(ApiError::MissingVideo)
    }
}

impl Operation {
    /// Take the first generated video out of a terminal operation.
    pub fn into_video(self) -> Result<GeneratedVideo, ApiError> {
        self.response
            .and_then(|r| r.videos.into_iter().next())
            .ok_or(ApiError::MissingVideo)
    }
}

/// Client for the Vertex AI Veo `predictLongRunning` endpoint.
pub struct VeoClient {
    http: reqwest::Client,
    project_id: String,
    auth: Arc<TokenProvider>,
}

impl VeoClient {
    pub fn new(project_id: &str, auth: Arc<TokenProvider>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(VeoClient {
            http,
            project_id: project_id.into(),
            auth,
        })
    }

    fn model_url(&self, verb: &str) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}:{verb}",
            loc = VIDEO_LOCATION,
            proj = self.project_id,
            model = VIDEO_MODEL,
        )
    }

    /// Submit a first/last-frame conditioned video job. Returns the
    /// operation handle to poll.
    pub async fn submit(
        &self,
        prompt: &str,
        first_frame: FrameImage,
        last_frame: FrameImage,
    ) -> Result<Operation, ApiError> {
        let request = VideoRequest {
            instances: vec![VideoInstance {
                prompt: prompt.into(),
                image: first_frame,
                last_frame,
            }],
            parameters: VideoParameters {
                aspect_ratio: "16:9".into(),
                duration_seconds: 4,
                generate_audio: false,
                resolution: "720p".into(),
            },
        };

        let token = self.auth.bearer_token().await?;
        let resp = self
            .http
            .post(self.model_url("predictLongRunning"))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: "predictLongRunning",
                status,
                body,
            });
        }

        Ok(resp.json().await?)
    }

    pub async fn fetch_operation(&self, name: &str) -> Result<Operation, ApiError> {
        let token = self.auth.bearer_token().await?;
        let resp = self
            .http
            .post(self.model_url("fetchPredictOperation"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "operationName": name }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: "fetchPredictOperation",
                status,
                body,
            });
        }

        Ok(resp.json().await?)
    }

    /// Poll `operation` every 15 seconds until it reports done.
    pub async fn await_completion(&self, operation: Operation) -> Result<Operation, ApiError> {
        poll_until_done(operation, POLL_INTERVAL, |name| async move {
            self.fetch_operation(&name).await
        })
        .await
    }
}

/// Fixed-interval poll loop: sleep, refetch, repeat until the operation
/// first reports done. No timeout and no poll-count bound.
async fn poll_until_done<F, Fut>(
    mut operation: Operation,
    interval: Duration,
    mut fetch: F,
) -> Result<Operation, ApiError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Operation, ApiError>>,
{
    let mut poll_count = 0u32;

    while !operation.done {
        poll_count += 1;
        tracing::info!("Waiting for video operation... (poll #{})", poll_count);
        tokio::time::sleep(interval).await;
        operation = fetch(operation.name.clone()).await?;
    }

    if let Some(err) = operation.error {
        return Err(ApiError::OperationFailed(format!(
            "code {}: {}",
            err.code.unwrap_or_default(),
            err.message.unwrap_or_default()
        )));
    }

    Ok(operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn pending_operation(name: &str) -> Operation {
        serde_json::from_value(serde_json::json!({ "name": name })).unwrap()
    }

    fn finished_operation(name: &str, videos: serde_json::Value) -> Operation {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "done": true,
            "response": { "videos": videos }
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_fetches_once_per_interval_until_done() {
        let calls = Cell::new(0u32);
        let start = tokio::time::Instant::now();

        let result = poll_until_done(
            pending_operation("operations/op-1"),
            Duration::from_secs(15),
            |name| {
                calls.set(calls.get() + 1);
                let done = calls.get() >= 3;
                async move {
                    assert_eq!(name, "operations/op-1");
                    Ok(if done {
                        finished_operation("operations/op-1", serde_json::json!([]))
                    } else {
                        pending_operation("operations/op-1")
                    })
                }
            },
        )
        .await
        .unwrap();

        assert!(result.done);
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_skips_fetch_when_already_done() {
        let operation = finished_operation("operations/op-2", serde_json::json!([]));

        let result = poll_until_done(operation, Duration::from_secs(15), |_| async move {
            panic!("must not fetch an operation that is already done")
        })
        .await
        .unwrap();

        assert!(result.done);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_surfaces_operation_error() {
        let operation: Operation = serde_json::from_value(serde_json::json!({
            "name": "operations/op-3",
            "done": true,
            "error": { "code": 13, "message": "internal" }
        }))
        .unwrap();

        let err = poll_until_done(operation, Duration::from_secs(15), |_| async move {
            panic!("terminal operation must not be refetched")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::OperationFailed(_)));
    }

    #[test]
    fn inline_video_decodes_to_bytes() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"mp4 payload");
        let operation = finished_operation(
            "operations/op-4",
            serde_json::json!([{ "bytesBase64Encoded": b64, "mimeType": "video/mp4" }]),
        );

        let video = operation.into_video().unwrap();
        match video.into_artifact().unwrap() {
            VideoArtifact::Bytes(bytes) => assert_eq!(bytes, b"mp4 payload"),
            VideoArtifact::Remote(_) => panic!("expected inline bytes"),
        }
    }

    #[test]
    fn remote_video_yields_uri_without_bytes() {
        let operation = finished_operation(
            "operations/op-5",
            serde_json::json!([{ "gcsUri": "gs://bucket/video.mp4" }]),
        );

        let video = operation.into_video().unwrap();
        match video.into_artifact().unwrap() {
            VideoArtifact::Remote(uri) => assert_eq!(uri, "gs://bucket/video.mp4"),
            VideoArtifact::Bytes(_) => panic!("expected remote reference"),
        }
    }

    #[test]
    fn empty_video_list_is_an_error() {
        let operation = finished_operation("operations/op-6", serde_json::json!([]));
        assert!(matches!(
            operation.into_video(),
            Err(ApiError::MissingVideo)
        ));
    }

    #[test]
    fn video_with_no_payload_is_an_error() {
        let operation = finished_operation("operations/op-7", serde_json::json!([{}]));
        let video = operation.into_video().unwrap();
        assert!(matches!(video.into_artifact(), Err(ApiError::MissingVideo)));
    }
}
