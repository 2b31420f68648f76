//! Google Gemini image backend.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ModelBackend, ModelError, ModelPlan, RawImage, classify_http_failure};
use crate::job::ProviderId;

/// Primary model.
pub const PRIMARY_MODEL: &str = "gemini-2.5-flash-image-preview";
/// Fallback model.
pub const FALLBACK_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

/// HTTP client for `models/{model}:generateContent`.
#[derive(Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GeminiBackend {
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

    fn request_body(prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
        })
    }

    fn extract_image(response: GenerateContentResponse) -> Result<RawImage, ModelError> {
        let inline = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data);

        let Some(inline) = inline else {
            let reason = response
                .prompt_feedback
                .map_or_else(|| "no image part in response".to_string(), |f| format!("blocked: {f}"));
            return Err(ModelError::Transient(reason));
        };

        let bytes = STANDARD
            .decode(inline.data.trim())
            .map_err(|e| ModelError::Transient(format!("invalid base64 image: {e}")))?;

        Ok(RawImage {
            bytes,
            mime_type: inline.mime_type,
        })
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn provider(&self) -> ProviderId {
        ProviderId::GoogleGemini
    }

    async fn generate_image(&self, model: &str, prompt: &str) -> Result<RawImage, ModelError> {
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        debug!(model = %model, "Requesting image from Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(|e| ModelError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Transient(format!("invalid response body: {e}")))?;

        Self::extract_image(parsed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_inline_image() {
        let body = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is your emoji"},
                        {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
                    ]
                }
            }]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let image = GeminiBackend::extract_image(parsed).unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn test_text_only_response_is_transient() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(
            GeminiBackend::extract_image(parsed),
            Err(ModelError::Transient(_))
        ));
    }

    #[test]
    fn test_blocked_prompt_reports_feedback() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        match GeminiBackend::extract_image(parsed) {
            Err(ModelError::Transient(reason)) => assert!(reason.contains("SAFETY")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_request_asks_for_image_modality() {
        let body = GeminiBackend::request_body("a cat");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a cat");
        assert_eq!(body["generationConfig"]["responseModalities"][1], "IMAGE");
    }
}
