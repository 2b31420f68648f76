//! Inbound chat-platform payloads.
//!
//! Only the fields the ingress reads are modelled; everything else is
//! ignored on decode.

use serde::Deserialize;
use std::collections::HashMap;

/// Body of `POST /events`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    /// Endpoint ownership handshake.
    UrlVerification { challenge: String },
    /// A subscribed event.
    EventCallback {
        #[serde(default)]
        event_id: Option<String>,
        event: CallbackEvent,
    },
    /// Any other envelope type.
    #[serde(other)]
    Other,
}

impl EventEnvelope {
    /// Cheap check used before the signature is trusted.
    #[must_use]
    pub fn is_handshake(body: &[u8]) -> bool {
        matches!(
            serde_json::from_slice::<Self>(body),
            Ok(Self::UrlVerification { .. })
        )
    }
}

/// Inner event of an `event_callback`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEvent {
    /// Event type, e.g. `app_mention`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Author of the message.
    #[serde(default)]
    pub user: Option<String>,
    /// Message text.
    #[serde(default)]
    pub text: Option<String>,
    /// Channel the event happened in.
    #[serde(default)]
    pub channel: Option<String>,
    /// Message timestamp.
    #[serde(default)]
    pub ts: Option<String>,
    /// Parent thread timestamp.
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Present when a bot authored the message.
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// Form body of `POST /interactive`.
#[derive(Debug, Deserialize)]
pub struct InteractionForm {
    /// JSON-encoded [`InteractionPayload`].
    pub payload: String,
}

/// Decoded `payload` field of an interaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionPayload {
    /// A modal was submitted.
    ViewSubmission { user: InteractionUser, view: View },
    /// Any other interaction.
    #[serde(other)]
    Other,
}

/// User behind an interaction.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionUser {
    /// Platform user id.
    pub id: String,
}

/// A submitted modal.
#[derive(Debug, Clone, Deserialize)]
pub struct View {
    /// Identifies which modal this is.
    #[serde(default)]
    pub callback_id: String,
    /// Opaque data attached when the modal was opened.
    #[serde(default)]
    pub private_metadata: String,
    /// Input values.
    #[serde(default)]
    pub state: ViewState,
}

/// Submitted inputs keyed by block id, then action id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewState {
    /// `block_id -> action_id -> value`.
    #[serde(default)]
    pub values: HashMap<String, HashMap<String, InputValue>>,
}

/// Value of one input element.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputValue {
    /// Text input value.
    #[serde(default)]
    pub value: Option<String>,
    /// Select menu choice.
    #[serde(default)]
    pub selected_option: Option<SelectedOption>,
}

/// Chosen select option.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectedOption {
    /// Option value.
    pub value: String,
}

impl InputValue {
    /// Typed text or the chosen option, whichever the element carries.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.value
            .as_deref()
            .or_else(|| self.selected_option.as_ref().map(|o| o.value.as_str()))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Context the modal opener stored in `private_metadata`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestMetadata {
    /// Channel the modal was opened from.
    pub channel_id: String,
    /// Thread the modal was opened from.
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Message the modal was opened on.
    #[serde(default)]
    pub message_text: Option<String>,
}

/// Submitted input values keyed by `action_id`.
#[derive(Debug, Default)]
pub struct SubmittedValues {
    values: HashMap<String, (String, Option<String>)>,
}

impl SubmittedValues {
    /// Flatten a view state, remembering which block each input sits in.
    #[must_use]
    pub fn from_state(state: &ViewState) -> Self {
        let mut values = HashMap::new();
        for (block_id, actions) in &state.values {
            for (action_id, input) in actions {
                values.insert(
                    action_id.clone(),
                    (block_id.clone(), input.text().map(ToString::to_string)),
                );
            }
        }
        Self { values }
    }

    /// Value of a non-blank input.
    #[must_use]
    pub fn get(&self, action_id: &str) -> Option<&str> {
        self.values.get(action_id).and_then(|(_, v)| v.as_deref())
    }

    /// Block holding an input, for error placement.
    #[must_use]
    pub fn block_of(&self, action_id: &str) -> Option<&str> {
        self.values.get(action_id).map(|(b, _)| b.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_variants() {
        let handshake: EventEnvelope =
            serde_json::from_str(r#"{"type":"url_verification","challenge":"abc123","token":"t"}"#).unwrap();
        assert!(matches!(handshake, EventEnvelope::UrlVerification { challenge } if challenge == "abc123"));

        let callback: EventEnvelope = serde_json::from_str(
            r#"{"type":"event_callback","event_id":"Ev1","event":{"type":"app_mention","user":"U1","text":"<@U0> taco","channel":"C1","ts":"1.2"}}"#,
        )
        .unwrap();
        match callback {
            EventEnvelope::EventCallback { event_id, event } => {
                assert_eq!(event_id.as_deref(), Some("Ev1"));
                assert_eq!(event.kind, "app_mention");
                assert_eq!(event.channel.as_deref(), Some("C1"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let other: EventEnvelope = serde_json::from_str(r#"{"type":"app_rate_limited"}"#).unwrap();
        assert!(matches!(other, EventEnvelope::Other));
    }

    #[test]
    fn test_is_handshake() {
        assert!(EventEnvelope::is_handshake(br#"{"type":"url_verification","challenge":"x"}"#));
        assert!(!EventEnvelope::is_handshake(br#"{"type":"event_callback"}"#));
        assert!(!EventEnvelope::is_handshake(b"garbage"));
    }

    #[test]
    fn test_submitted_values_flatten_inputs_and_selects() {
        let payload: InteractionPayload = serde_json::from_str(
            r#"{
                "type": "view_submission",
                "user": {"id": "U1"},
                "view": {
                    "callback_id": "emoji_request",
                    "private_metadata": "{\"channel_id\":\"C1\"}",
                    "state": {"values": {
                        "desc_block": {"description": {"type": "plain_text_input", "value": "  a taco  "}},
                        "provider_block": {"provider": {"type": "static_select", "selected_option": {"value": "google_gemini"}}},
                        "name_block": {"emoji_name": {"type": "plain_text_input", "value": ""}}
                    }}
                }
            }"#,
        )
        .unwrap();

        let InteractionPayload::ViewSubmission { user, view } = payload else {
            panic!("expected view submission");
        };
        assert_eq!(user.id, "U1");

        let values = SubmittedValues::from_state(&view.state);
        assert_eq!(values.get("description"), Some("a taco"));
        assert_eq!(values.get("provider"), Some("google_gemini"));
        assert_eq!(values.block_of("description"), Some("desc_block"));
        // Blank inputs count as absent but keep their block
        assert_eq!(values.get("emoji_name"), None);
        assert_eq!(values.block_of("emoji_name"), Some("name_block"));
    }
}
