//! Push subscription envelopes.
//!
//! The push transport wraps each message as
//! `{"message": {"data": <base64>, "messageId": .., "attributes": {..}}, "subscription": .., "deliveryAttempt": n}`
//! and POSTs it to the worker endpoint.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use emojibot_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use emojibot_core::EmojiGenerationJob;

/// Attribute carrying the job id.
pub const JOB_ID_ATTRIBUTE: &str = "job_id";
/// Attribute carrying the trace id.
pub const TRACE_ID_ATTRIBUTE: &str = "trace_id";

/// One message inside a push envelope or publish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64 payload.
    #[serde(default)]
    pub data: String,
    /// Attributes set by the publisher.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    /// Transport-assigned message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// RFC 3339 publish time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
}

impl PushMessage {
    /// Wrap a job for publishing.
    pub fn for_job(job: &EmojiGenerationJob) -> AppResult<Self> {
        let attributes = HashMap::from([
            (JOB_ID_ATTRIBUTE.to_string(), job.job_id().to_string()),
            (TRACE_ID_ATTRIBUTE.to_string(), job.trace_id().to_string()),
        ]);
        Ok(Self {
            data: STANDARD.encode(job.to_bytes()?),
            attributes,
            message_id: None,
            publish_time: None,
        })
    }

    /// Wrap raw bytes with a reason attribute, for dead-lettering.
    #[must_use]
    pub fn raw(payload: &[u8], reason: &str) -> Self {
        Self {
            data: STANDARD.encode(payload),
            attributes: HashMap::from([("reason".to_string(), reason.to_string())]),
            message_id: None,
            publish_time: None,
        }
    }

    /// Decoded payload bytes.
    pub fn payload(&self) -> AppResult<Vec<u8>> {
        STANDARD
            .decode(self.data.trim())
            .map_err(|e| AppError::CorruptedJobData(format!("Message data is not base64: {e}")))
    }
}

/// Body of a push delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    /// The delivered message.
    pub message: PushMessage,
    /// Subscription that pushed it.
    #[serde(default)]
    pub subscription: String,
    /// 1-based; absent when the subscription has no dead-letter policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_attempt: Option<u32>,
}

impl PushEnvelope {
    /// Parse a push request body.
    pub fn from_slice(body: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid push envelope: {e}")))
    }

    /// Delivery attempt, defaulting to the first.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.delivery_attempt.unwrap_or(1).max(1)
    }

    /// Message id, or `-` when absent.
    #[must_use]
    pub fn message_id(&self) -> &str {
        self.message.message_id.as_deref().unwrap_or("")
    }
}

/// Body of a topic publish call.
#[derive(Debug, Serialize)]
pub struct PublishRequest {
    /// Messages to publish.
    pub messages: Vec<PushMessage>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_push_envelope() {
        let body = br#"{
            "message": {
                "data": "eyJrIjoxfQ==",
                "messageId": "123",
                "publishTime": "2024-05-01T12:00:00Z",
                "attributes": {"job_id": "01hx"}
            },
            "subscription": "projects/p/subscriptions/emoji-worker",
            "deliveryAttempt": 3
        }"#;

        let envelope = PushEnvelope::from_slice(body).unwrap();
        assert_eq!(envelope.attempt(), 3);
        assert_eq!(envelope.message_id(), "123");
        assert_eq!(envelope.message.payload().unwrap(), br#"{"k":1}"#);
        assert_eq!(envelope.message.attributes[JOB_ID_ATTRIBUTE], "01hx");
    }

    #[test]
    fn test_attempt_defaults_to_first() {
        let envelope = PushEnvelope::from_slice(br#"{"message": {"data": ""}}"#).unwrap();
        assert_eq!(envelope.attempt(), 1);
    }

    #[test]
    fn test_invalid_envelope_is_bad_request() {
        assert!(matches!(
            PushEnvelope::from_slice(b"[]"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_invalid_base64_is_corrupted() {
        let envelope = PushEnvelope::from_slice(br#"{"message": {"data": "%%%"}}"#).unwrap();
        assert!(matches!(
            envelope.message.payload(),
            Err(AppError::CorruptedJobData(_))
        ));
    }
}
