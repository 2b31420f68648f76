//! `OpenAI` Images API backend.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ModelBackend, ModelError, ModelPlan, RawImage, classify_http_failure};
use crate::job::ProviderId;

/// Primary model.
pub const PRIMARY_MODEL: &str = "gpt-image-1";
/// Fallback model.
pub const FALLBACK_MODEL: &str = "dall-e-3";

/// HTTP client for `POST /images/generations`.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
}

impl OpenAiBackend {
    /// Create a backend with a shared HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Model plan used by this backend.
    #[must_use]
    pub fn plan() -> ModelPlan {
        ModelPlan::new(PRIMARY_MODEL, FALLBACK_MODEL)
    }

    fn request_for<'a>(model: &'a str, prompt: &'a str) -> ImageRequest<'a> {
        // gpt-image-1 always answers with base64 and supports transparency;
        // the dall-e models need b64 requested explicitly.
        if model.starts_with("gpt-image") {
            ImageRequest {
                model,
                prompt,
                n: 1,
                size: "1024x1024",
                response_format: None,
                background: Some("transparent"),
                output_format: Some("png"),
            }
        } else {
            ImageRequest {
                model,
                prompt,
                n: 1,
                size: "1024x1024",
                response_format: Some("b64_json"),
                background: None,
                output_format: None,
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ModelError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ModelError::Transient(format!("image download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ModelError::Transient(format!(
                "image download returned {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ModelError::Transient(format!("image download failed: {e}")))
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn generate_image(&self, model: &str, prompt: &str) -> Result<RawImage, ModelError> {
        let url = format!("{}/images/generations", self.base_url);
        debug!(model = %model, "Requesting image from OpenAI");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_for(model, prompt))
            .send()
            .await
            .map_err(|e| ModelError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }

        let parsed: ImageResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Transient(format!("invalid response body: {e}")))?;

        let Some(first) = parsed.data.into_iter().next() else {
            return Err(ModelError::Transient("response contained no images".to_string()));
        };

        let bytes = match (first.b64_json, first.url) {
            (Some(encoded), _) => STANDARD
                .decode(encoded.trim())
                .map_err(|e| ModelError::Transient(format!("invalid base64 image: {e}")))?,
            (None, Some(url)) => self.download(&url).await?,
            (None, None) => {
                return Err(ModelError::Transient("image entry had no payload".to_string()));
            }
        };

        Ok(RawImage {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape_per_model() {
        let primary = serde_json::to_value(OpenAiBackend::request_for(PRIMARY_MODEL, "cat")).unwrap();
        assert_eq!(primary["model"], "gpt-image-1");
        assert_eq!(primary["background"], "transparent");
        assert!(primary.get("response_format").is_none());

        let fallback = serde_json::to_value(OpenAiBackend::request_for(FALLBACK_MODEL, "cat")).unwrap();
        assert_eq!(fallback["response_format"], "b64_json");
        assert!(fallback.get("background").is_none());
        assert_eq!(fallback["n"], 1);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"created": 1, "data": [{"b64_json": "aGVsbG8="}]}"#;
        let parsed: ImageResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].b64_json.as_deref(), Some("aGVsbG8="));
    }

    #[test]
    fn test_plan() {
        let plan = OpenAiBackend::plan();
        assert_eq!(plan.primary, PRIMARY_MODEL);
        assert_eq!(plan.fallback, FALLBACK_MODEL);
    }

    #[test]
    fn test_debug_hides_key() {
        let backend = OpenAiBackend::new(reqwest::Client::new(), "sk-secret", "https://api.example.com/v1/");
        let rendered = format!("{backend:?}");
        assert!(!rendered.contains("sk-secret"));
        assert_eq!(backend.base_url, "https://api.example.com/v1");
    }
}
