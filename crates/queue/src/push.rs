//! Push-topic transport.
//!
//! Jobs are published to a topic; the subscription pushes each message back
//! to `POST /process`. Acknowledgement is the HTTP status of that call.

use async_trait::async_trait;
use emojibot_common::config::QueueConfig;
use emojibot_common::{AppError, AppResult};
use std::time::Duration;
use tracing::{debug, info};

use emojibot_core::{DeadLetterSink, EmojiGenerationJob, JobQueue};

use crate::envelope::{PublishRequest, PushMessage};

/// Publishes messages to one topic.
#[derive(Clone)]
pub struct TopicPublisher {
    http_client: reqwest::Client,
    publish_url: String,
    auth_token: Option<String>,
}

impl std::fmt::Debug for TopicPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicPublisher")
            .field("publish_url", &self.publish_url)
            .finish_non_exhaustive()
    }
}

impl TopicPublisher {
    /// Publisher for `projects/{project}/topics/{topic}`.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        base_url: &str,
        project_id: &str,
        topic: &str,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            http_client,
            publish_url: format!(
                "{}/projects/{project_id}/topics/{topic}:publish",
                base_url.trim_end_matches('/')
            ),
            auth_token,
        }
    }

    /// Topic publish endpoint.
    #[must_use]
    pub fn publish_url(&self) -> &str {
        &self.publish_url
    }

    /// Publish one message.
    pub async fn publish(&self, message: PushMessage) -> AppResult<()> {
        let mut request = self.http_client.post(&self.publish_url).json(&PublishRequest {
            messages: vec![message],
        });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Queue(format!("Publish request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Queue(format!("Publish returned HTTP {status}: {body}")));
        }
        Ok(())
    }
}

fn required<'a>(value: Option<&'a String>, name: &str) -> AppResult<&'a str> {
    value
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Configuration(format!("queue.{name} is required for the push backend")))
}

/// [`JobQueue`] that publishes to the jobs topic.
#[derive(Debug, Clone)]
pub struct PushTopicQueue {
    publisher: TopicPublisher,
}

impl PushTopicQueue {
    /// Queue publishing through `publisher`.
    #[must_use]
    pub const fn new(publisher: TopicPublisher) -> Self {
        Self { publisher }
    }

    /// Build from configuration.
    pub fn from_config(http_client: reqwest::Client, config: &QueueConfig) -> AppResult<Self> {
        let project = required(config.project_id.as_ref(), "project_id")?;
        let topic = required(config.topic.as_ref(), "topic")?;
        Ok(Self::new(TopicPublisher::new(
            http_client,
            &config.publish_base_url,
            project,
            topic,
            config.auth_token.clone(),
        )))
    }
}

#[async_trait]
impl JobQueue for PushTopicQueue {
    async fn enqueue(&self, job: &EmojiGenerationJob) -> AppResult<()> {
        let message = PushMessage::for_job(job)?;
        self.publisher.publish(message).await?;
        info!(job_id = %job.job_id(), trace_id = %job.trace_id(), "Job published");
        Ok(())
    }
}

/// [`DeadLetterSink`] that publishes to the dead-letter topic.
#[derive(Debug, Clone)]
pub struct PushDeadLetterSink {
    publisher: TopicPublisher,
}

impl PushDeadLetterSink {
    /// Sink publishing through `publisher`.
    #[must_use]
    pub const fn new(publisher: TopicPublisher) -> Self {
        Self { publisher }
    }

    /// Build from configuration; `None` when no dead-letter topic is set.
    pub fn from_config(http_client: reqwest::Client, config: &QueueConfig) -> AppResult<Option<Self>> {
        let Some(topic) = config.dead_letter_topic.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };
        let project = required(config.project_id.as_ref(), "project_id")?;
        Ok(Some(Self::new(TopicPublisher::new(
            http_client,
            &config.publish_base_url,
            project,
            topic,
            config.auth_token.clone(),
        ))))
    }
}

#[async_trait]
impl DeadLetterSink for PushDeadLetterSink {
    async fn dead_letter(&self, payload: &[u8], reason: &str) -> AppResult<()> {
        self.publisher.publish(PushMessage::raw(payload, reason)).await?;
        debug!(reason = %reason, bytes = payload.len(), "Payload moved to dead-letter topic");
        Ok(())
    }
}

/// Default timeout for publish calls; well inside the ingress deadline.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_url() {
        let publisher = TopicPublisher::new(
            reqwest::Client::new(),
            "https://pubsub.example.com/v1/",
            "proj",
            "emoji-jobs",
            None,
        );
        assert_eq!(
            publisher.publish_url(),
            "https://pubsub.example.com/v1/projects/proj/topics/emoji-jobs:publish"
        );
    }

    #[test]
    fn test_push_queue_requires_topic() {
        let config = QueueConfig {
            project_id: Some("proj".to_string()),
            ..QueueConfig::default()
        };
        let err = PushTopicQueue::from_config(reqwest::Client::new(), &config).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_dead_letter_sink_is_optional() {
        let config = QueueConfig::default();
        assert!(PushDeadLetterSink::from_config(reqwest::Client::new(), &config).unwrap().is_none());

        let config = QueueConfig {
            project_id: Some("proj".to_string()),
            dead_letter_topic: Some("emoji-dead".to_string()),
            ..QueueConfig::default()
        };
        assert!(PushDeadLetterSink::from_config(reqwest::Client::new(), &config).unwrap().is_some());
    }
}
