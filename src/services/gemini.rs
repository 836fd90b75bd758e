use crate::auth::TokenProvider;
use crate::error::ApiError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

// gemini-3-pro-image-preview is only served from the global endpoint.
pub const IMAGE_LOCATION: &str = "global";

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<String>,
    #[serde(rename = "imageConfig")]
    image_config: ImageConfig,
}

#[derive(Serialize)]
struct ImageConfig {
    #[serde(rename = "aspectRatio")]
    aspect_ratio: String,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(rename = "inlineData")]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Deserialize, Debug)]
struct ResponseInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

pub struct ImageResult {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Client for the Vertex AI `generateContent` image endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    project_id: String,
    auth: Arc<TokenProvider>,
}

impl GeminiClient {
    pub fn new(project_id: &str, auth: Arc<TokenProvider>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;

        Ok(GeminiClient {
            http,
            project_id: project_id.into(),
            auth,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://aiplatform.googleapis.com/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.project_id, IMAGE_LOCATION, IMAGE_MODEL
        )
    }

    /// Generate a 16:9 image from `prompt`, optionally conditioned on an
    /// inline reference image. Returns the decoded image bytes.
    pub async fn generate_image(
        &self,
        prompt: &str,
        reference: Option<&[u8]>,
    ) -> Result<ImageResult, ApiError> {
        let mut parts: Vec<RequestPart> = Vec::new();

        if let Some(bytes) = reference {
            tracing::debug!("Attaching reference image ({}KB)", bytes.len() / 1024);
            parts.push(RequestPart::InlineData {
                inline_data: InlineData {
                    mime_type: "image/png".into(),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                },
            });
        }

        parts.push(RequestPart::Text {
            text: prompt.into(),
        });

        let request = GenerateRequest {
            contents: vec![RequestContent { parts }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".into()],
                image_config: ImageConfig {
                    aspect_ratio: "16:9".into(),
                },
            },
        };

        let token = self.auth.bearer_token().await?;
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: "generateContent",
                status,
                body,
            });
        }

        let data: GenerateResponse = resp.json().await?;
        let image = extract_image(&data)?;
        tracing::debug!(
            "Received {} payload ({}KB)",
            image.mime_type,
            image.bytes.len() / 1024
        );
        Ok(image)
    }
}

/// Pull the first inline image part out of a generateContent response.
fn extract_image(response: &GenerateResponse) -> Result<ImageResult, ApiError> {
    let parts = response
        .candidates
        .as_deref()
        .and_then(|c| c.first())
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.as_deref())
        .ok_or(ApiError::MissingImage)?;

    let inline = parts
        .iter()
        .filter_map(|p| p.inline_data.as_ref())
        .find(|d| d.mime_type.starts_with("image/"))
        .ok_or(ApiError::MissingImage)?;

    let bytes = base64::engine::general_purpose::STANDARD.decode(&inline.data)?;

    Ok(ImageResult {
        bytes,
        mime_type: inline.mime_type.clone(),
    })
}

/// Write decoded image bytes to `path`, creating parent directories.
pub fn save_image(bytes: &[u8], path: &Path) -> Result<(), ApiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    tracing::info!("Saved image: {} ({}KB)", path.display(), bytes.len() / 1024);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_parts(parts: serde_json::Value) -> GenerateResponse {
        serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": parts } }]
        }))
        .unwrap()
    }

    #[test]
    fn extract_image_returns_decoded_bytes() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"fake png bytes");
        let response = response_with_parts(serde_json::json!([
            { "text": "here is your image" },
            { "inlineData": { "mimeType": "image/png", "data": payload } }
        ]));

        let result = extract_image(&response).unwrap();
        assert_eq!(result.bytes, b"fake png bytes");
        assert_eq!(result.mime_type, "image/png");
    }

    #[test]
    fn extract_image_skips_non_image_inline_parts() {
        let audio = base64::engine::general_purpose::STANDARD.encode(b"audio");
        let image = base64::engine::general_purpose::STANDARD.encode(b"image");
        let response = response_with_parts(serde_json::json!([
            { "inlineData": { "mimeType": "audio/ogg", "data": audio } },
            { "inlineData": { "mimeType": "image/jpeg", "data": image } }
        ]));

        let result = extract_image(&response).unwrap();
        assert_eq!(result.bytes, b"image");
        assert_eq!(result.mime_type, "image/jpeg");
    }

    #[test]
    fn extract_image_fails_when_no_image_part() {
        let response = response_with_parts(serde_json::json!([{ "text": "no image today" }]));
        assert!(matches!(
            extract_image(&response),
            Err(ApiError::MissingImage)
        ));

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(extract_image(&empty), Err(ApiError::MissingImage)));
    }

    #[test]
    fn save_image_writes_bytes_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/step1_sitting.png");

        save_image(b"pixels", &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"pixels");
    }
}
