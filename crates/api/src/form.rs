//! Emoji request modal submissions.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use validator::Validate;

use emojibot_core::{EmojiName, ProviderId, SharingPreferences};

use crate::ingress::EmojiRequest;
use crate::payload::{RequestMetadata, SubmittedValues};

/// Callback id of the request modal.
pub const EMOJI_REQUEST_CALLBACK: &str = "emoji_request";

// Input action ids
/// What the emoji should show.
pub const DESCRIPTION: &str = "description";
/// Requested short name.
pub const EMOJI_NAME: &str = "emoji_name";
/// Image provider choice.
pub const PROVIDER: &str = "provider";
/// New or existing thread.
pub const PLACEMENT: &str = "placement";
/// Who sees the result.
pub const VISIBILITY: &str = "visibility";
/// Output edge length.
pub const IMAGE_SIZE: &str = "image_size";
/// Number of variants.
pub const VARIANTS: &str = "variants";

/// Per-input error messages, keyed by action id.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FormErrors(pub BTreeMap<String, String>);

impl FormErrors {
    fn single(action_id: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(action_id, message);
        errors
    }

    fn add(&mut self, action_id: &str, message: impl Into<String>) {
        self.0.entry(action_id.to_string()).or_insert_with(|| message.into());
    }

    /// Whether no input was rejected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<validator::ValidationErrors> for FormErrors {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut errors = Self::default();
        for (field, field_errors) in err.field_errors() {
            let message = field_errors
                .iter()
                .find_map(|e| e.message.as_ref().map(ToString::to_string))
                .unwrap_or_else(|| "Invalid value".to_string());
            errors.add(&field, message);
        }
        errors
    }
}

/// Raw modal inputs.
#[derive(Debug, Clone, Validate)]
pub struct EmojiRequestForm {
    /// Free-text description.
    #[validate(length(min = 3, max = 1000, message = "Describe the emoji in a few words"))]
    pub description: String,

    /// Short name; derived from the description when blank.
    #[validate(length(max = 100, message = "Emoji names are at most 100 characters"))]
    pub emoji_name: Option<String>,

    /// Provider id, e.g. `openai`.
    pub provider: Option<String>,
    /// Thread placement option value.
    pub placement: Option<String>,
    /// Visibility option value.
    pub visibility: Option<String>,
    /// Image size option value.
    pub image_size: Option<String>,

    /// How many images to generate.
    #[validate(range(min = 1, max = 4, message = "Choose between 1 and 4 variants"))]
    pub variants: u8,
}

impl EmojiRequestForm {
    /// Read the inputs of a submitted view.
    pub fn from_values(values: &SubmittedValues) -> Result<Self, FormErrors> {
        let variants = match values.get(VARIANTS) {
            Some(raw) => raw
                .parse()
                .map_err(|_| FormErrors::single(VARIANTS, "Choose between 1 and 4 variants"))?,
            None => 1,
        };

        Ok(Self {
            description: values.get(DESCRIPTION).unwrap_or_default().to_string(),
            emoji_name: values.get(EMOJI_NAME).map(ToString::to_string),
            provider: values.get(PROVIDER).map(ToString::to_string),
            placement: values.get(PLACEMENT).map(ToString::to_string),
            visibility: values.get(VISIBILITY).map(ToString::to_string),
            image_size: values.get(IMAGE_SIZE).map(ToString::to_string),
            variants,
        })
    }

    /// Validate the inputs and turn them into an ingress request.
    pub fn into_request(
        self,
        requester_id: &str,
        metadata: RequestMetadata,
    ) -> Result<EmojiRequest, FormErrors> {
        self.validate()?;

        let mut errors = FormErrors::default();

        let emoji_name = match &self.emoji_name {
            Some(raw) => EmojiName::parse(raw),
            None => EmojiName::from_description(&self.description),
        };
        let emoji_name = emoji_name
            .map_err(|_| errors.add(EMOJI_NAME, "Use letters, numbers, dashes or underscores"))
            .ok();

        let provider = match self.provider.as_deref() {
            Some(raw) => raw
                .parse::<ProviderId>()
                .map(Some)
                .map_err(|_| errors.add(PROVIDER, "Unknown image provider"))
                .unwrap_or_default(),
            None => None,
        };

        let mut sharing_preferences = SharingPreferences::default();
        if let Some(raw) = self.placement.as_deref() {
            match choice(raw) {
                Some(placement) => sharing_preferences.placement = placement,
                None => errors.add(PLACEMENT, "Unknown thread placement"),
            }
        }
        if let Some(raw) = self.visibility.as_deref() {
            match choice(raw) {
                Some(visibility) => sharing_preferences.visibility = visibility,
                None => errors.add(VISIBILITY, "Unknown visibility"),
            }
        }
        if let Some(raw) = self.image_size.as_deref() {
            match raw.parse() {
                Ok(size) => sharing_preferences.image_size = size,
                Err(_) => errors.add(IMAGE_SIZE, "Choose 512, 256 or 128 pixels"),
            }
        }

        let Some(emoji_name) = emoji_name.filter(|_| errors.is_empty()) else {
            return Err(errors);
        };

        Ok(EmojiRequest {
            description: self.description.trim().to_string(),
            emoji_name: Some(emoji_name),
            provider,
            sharing_preferences,
            requester_id: requester_id.to_string(),
            origin_id: metadata.channel_id,
            thread_ts: metadata.thread_ts,
            context_text: metadata.message_text,
            variant_count: self.variants,
        })
    }
}

/// Parse a snake_case option value into one of the preference enums.
fn choice<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use emojibot_core::{ImageSize, ThreadPlacement, Visibility};

    fn form(description: &str) -> EmojiRequestForm {
        EmojiRequestForm {
            description: description.to_string(),
            emoji_name: None,
            provider: None,
            placement: None,
            visibility: None,
            image_size: None,
            variants: 1,
        }
    }

    fn metadata() -> RequestMetadata {
        RequestMetadata {
            channel_id: "C1".to_string(),
            thread_ts: Some("1700000000.000100".to_string()),
            message_text: Some("we need a mascot".to_string()),
        }
    }

    #[test]
    fn test_full_form_maps_to_request() {
        let mut f = form("a dancing taco");
        f.emoji_name = Some(":Dancing Taco:".to_string());
        f.provider = Some("google_gemini".to_string());
        f.placement = Some("existing_thread".to_string());
        f.visibility = Some("requester_only".to_string());
        f.image_size = Some("256".to_string());
        f.variants = 2;

        let request = f.into_request("U1", metadata()).unwrap();

        assert_eq!(request.emoji_name.unwrap().as_str(), "dancing_taco");
        assert_eq!(request.provider, Some(ProviderId::GoogleGemini));
        assert_eq!(request.sharing_preferences.placement, ThreadPlacement::ExistingThread);
        assert_eq!(request.sharing_preferences.visibility, Visibility::RequesterOnly);
        assert_eq!(request.sharing_preferences.image_size, ImageSize::Px256);
        assert_eq!(request.origin_id, "C1");
        assert_eq!(request.context_text.as_deref(), Some("we need a mascot"));
        assert_eq!(request.variant_count, 2);
    }

    #[test]
    fn test_name_is_derived_when_absent() {
        let request = form("party parrot with sunglasses on").into_request("U1", metadata()).unwrap();
        assert_eq!(request.emoji_name.unwrap().as_str(), "party_parrot_with_sunglasses");
        assert_eq!(request.provider, None);
    }

    #[test]
    fn test_short_description_is_rejected() {
        let errors = form("hi").into_request("U1", metadata()).unwrap_err();
        assert!(errors.0.contains_key(DESCRIPTION));
    }

    #[test]
    fn test_unknown_choices_are_reported_together() {
        let mut f = form("a rocket");
        f.provider = Some("midjourney".to_string());
        f.visibility = Some("nobody".to_string());
        f.emoji_name = Some("!!!".to_string());

        let errors = f.into_request("U1", metadata()).unwrap_err();

        assert!(errors.0.contains_key(PROVIDER));
        assert!(errors.0.contains_key(VISIBILITY));
        assert!(errors.0.contains_key(EMOJI_NAME));
    }

    #[test]
    fn test_variant_count_bounds() {
        let mut f = form("a rocket");
        f.variants = 5;
        let errors = f.into_request("U1", metadata()).unwrap_err();
        assert!(errors.0.contains_key(VARIANTS));

        let values = SubmittedValues::default();
        assert_eq!(EmojiRequestForm::from_values(&values).unwrap().variants, 1);
    }
}
