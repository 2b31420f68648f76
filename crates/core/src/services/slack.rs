//! Chat platform client.
//!
//! The worker and sharing strategies talk to the workspace through
//! [`ChatPlatform`]; [`SlackClient`] implements it over the Slack Web API.

use async_trait::async_trait;
use emojibot_common::{AppError, AppResult};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A file to upload into a conversation.
#[derive(Clone, Copy)]
pub struct FileUpload<'a> {
    /// Channel or DM to post into.
    pub channel: &'a str,
    /// Thread to post under.
    pub thread_ts: Option<&'a str>,
    /// Message posted together with the file. `None` uploads silently.
    pub initial_comment: Option<&'a str>,
    /// File name shown to users.
    pub filename: &'a str,
    /// File title.
    pub title: &'a str,
    /// File contents.
    pub bytes: &'a [u8],
}

impl std::fmt::Debug for FileUpload<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("channel", &self.channel)
            .field("thread_ts", &self.thread_ts)
            .field("initial_comment", &self.initial_comment)
            .field("filename", &self.filename)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Operations the bot performs in the workspace.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a message visible to the channel; returns the message timestamp.
    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> AppResult<String>;

    /// Post a message only `user` can see.
    async fn post_ephemeral(&self, channel: &str, user: &str, text: &str) -> AppResult<()>;

    /// Open (or reuse) a direct conversation with `user`; returns its channel id.
    async fn open_direct_channel(&self, user: &str) -> AppResult<String>;

    /// Upload a file into a conversation.
    async fn upload_file(&self, upload: FileUpload<'_>) -> AppResult<()>;

    /// Install an image as a custom emoji.
    async fn add_emoji(&self, name: &str, image: &[u8]) -> AppResult<()>;
}

/// Shared chat platform handle.
pub type ChatPlatformService = Arc<dyn ChatPlatform>;

/// Slack Web API client.
#[derive(Clone)]
pub struct SlackClient {
    http_client: reqwest::Client,
    bot_token: String,
    base_url: String,
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ts: String,
}

#[derive(Debug, Deserialize)]
struct OpenConversationResponse {
    channel: ChannelRef,
}

#[derive(Debug, Deserialize)]
struct ChannelRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    upload_url: String,
    file_id: String,
}

#[derive(Debug, Serialize)]
struct CompleteUpload<'a> {
    files: [UploadedFile<'a>; 1],
    channel_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_comment: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UploadedFile<'a> {
    id: &'a str,
    title: &'a str,
}

impl SlackClient {
    /// Create a client.
    pub fn new(bot_token: impl Into<String>, base_url: impl Into<String>) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(http_client, bot_token, base_url))
    }

    /// Create a client reusing an existing HTTP client.
    #[must_use]
    pub fn with_client(
        http_client: reqwest::Client,
        bot_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            bot_token: bot_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    /// Send a Web API request and decode the `ok` envelope.
    async fn call<T: DeserializeOwned>(&self, method: &str, request: reqwest::RequestBuilder) -> AppResult<T> {
        let response = request
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Slack {method} request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("?")
                .to_string();
            return Err(AppError::ExternalService(format!(
                "Slack {method} rate limited, retry after {retry_after}s"
            )));
        }
        if !status.is_success() {
            return Err(AppError::ExternalService(format!("Slack {method} returned HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Slack {method} sent invalid JSON: {e}")))?;

        parse_envelope(method, body)
    }
}

/// Check the `ok` flag of a Web API response and decode the payload.
fn parse_envelope<T: DeserializeOwned>(method: &str, body: Value) -> AppResult<T> {
    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
        return Err(AppError::ExternalService(format!("Slack {method} failed: {error}")));
    }

    if let Some(warning) = body.get("warning").and_then(Value::as_str) {
        debug!(method = %method, warning = %warning, "Slack API warning");
    }

    serde_json::from_value(body)
        .map_err(|e| AppError::ExternalService(format!("Slack {method} response missing fields: {e}")))
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> AppResult<String> {
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = Value::from(ts);
        }

        let request = self.http_client.post(self.url("chat.postMessage")).json(&body);
        let response: PostMessageResponse = self.call("chat.postMessage", request).await?;
        Ok(response.ts)
    }

    async fn post_ephemeral(&self, channel: &str, user: &str, text: &str) -> AppResult<()> {
        let body = serde_json::json!({ "channel": channel, "user": user, "text": text });
        let request = self.http_client.post(self.url("chat.postEphemeral")).json(&body);
        let _: Value = self.call("chat.postEphemeral", request).await?;
        Ok(())
    }

    async fn open_direct_channel(&self, user: &str) -> AppResult<String> {
        let body = serde_json::json!({ "users": user });
        let request = self.http_client.post(self.url("conversations.open")).json(&body);
        let response: OpenConversationResponse = self.call("conversations.open", request).await?;
        Ok(response.channel.id)
    }

    async fn upload_file(&self, upload: FileUpload<'_>) -> AppResult<()> {
        let length = upload.bytes.len().to_string();
        let request = self
            .http_client
            .post(self.url("files.getUploadURLExternal"))
            .form(&[("filename", upload.filename), ("length", length.as_str())]);
        let target: UploadUrlResponse = self.call("files.getUploadURLExternal", request).await?;

        let response = self
            .http_client
            .post(&target.upload_url)
            .body(upload.bytes.to_vec())
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("File upload failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "File upload returned HTTP {}",
                response.status()
            )));
        }

        let complete = CompleteUpload {
            files: [UploadedFile {
                id: &target.file_id,
                title: upload.title,
            }],
            channel_id: upload.channel,
            thread_ts: upload.thread_ts,
            initial_comment: upload.initial_comment,
        };
        let request = self
            .http_client
            .post(self.url("files.completeUploadExternal"))
            .json(&complete);
        let _: Value = self.call("files.completeUploadExternal", request).await?;

        debug!(file_id = %target.file_id, channel = %upload.channel, "File shared");
        Ok(())
    }

    async fn add_emoji(&self, name: &str, image: &[u8]) -> AppResult<()> {
        let part = Part::bytes(image.to_vec())
            .file_name(format!("{name}.png"))
            .mime_str("image/png")
            .map_err(|e| AppError::Internal(format!("Invalid mime type: {e}")))?;
        let form = Form::new()
            .text("mode", "data")
            .text("name", name.to_string())
            .part("image", part);

        let request = self.http_client.post(self.url("emoji.add")).multipart(form);
        let result: AppResult<Value> = self.call("emoji.add", request).await;
        if let Err(e) = &result {
            warn!(emoji = %name, error = %e, "Emoji install rejected");
        }
        result.map(|_| ())
    }
}

/// Tell the requester about a problem without touching the channel.
///
/// Falls back to a direct message when the ephemeral post is rejected
/// (for example when the bot is not a member of the origin channel).
pub async fn notify_requester(platform: &dyn ChatPlatform, channel: &str, user: &str, text: &str) -> AppResult<()> {
    match platform.post_ephemeral(channel, user, text).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "Ephemeral notification failed, sending a direct message");
            let dm = platform.open_direct_channel(user).await?;
            platform.post_message(&dm, None, text).await.map(|_| ())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_ok() {
        let body = serde_json::json!({ "ok": true, "ts": "1700000000.000100", "channel": "C1" });
        let parsed: PostMessageResponse = parse_envelope("chat.postMessage", body).unwrap();
        assert_eq!(parsed.ts, "1700000000.000100");
    }

    #[test]
    fn test_envelope_error() {
        let body = serde_json::json!({ "ok": false, "error": "not_in_channel" });
        let err = parse_envelope::<Value>("chat.postMessage", body).unwrap_err();
        match err {
            AppError::ExternalService(message) => assert!(message.contains("not_in_channel")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_envelope_missing_fields() {
        let body = serde_json::json!({ "ok": true });
        assert!(parse_envelope::<UploadUrlResponse>("files.getUploadURLExternal", body).is_err());
    }

    #[test]
    fn test_complete_upload_omits_empty_fields() {
        let complete = CompleteUpload {
            files: [UploadedFile { id: "F1", title: "taco" }],
            channel_id: "C1",
            thread_ts: None,
            initial_comment: None,
        };
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["files"][0]["id"], "F1");
        assert!(json.get("thread_ts").is_none());
        assert!(json.get("initial_comment").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = SlackClient::with_client(reqwest::Client::new(), "xoxb", "https://slack.test/api/");
        assert_eq!(client.url("chat.postMessage"), "https://slack.test/api/chat.postMessage");
        assert!(!format!("{client:?}").contains("xoxb"));
    }
}
