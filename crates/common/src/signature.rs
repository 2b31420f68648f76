//! Request signature verification for inbound chat-platform webhooks.
//!
//! The platform signs `v0:{timestamp}:{raw body}` with HMAC-SHA256 using the
//! app's signing secret and sends the result as `v0={hex}`.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature.
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Header carrying the unix timestamp the signature covers.
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Version prefix of the signed base string.
pub const SIGNATURE_VERSION: &str = "v0";

/// Default maximum request age.
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(300);

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureRejection {
    /// No timestamp header.
    #[error("missing timestamp header")]
    MissingTimestamp,
    /// No signature header.
    #[error("missing signature header")]
    MissingSignature,
    /// Timestamp is not an integer.
    #[error("malformed timestamp")]
    MalformedTimestamp,
    /// Signature is not `v0=` followed by hex.
    #[error("malformed signature")]
    MalformedSignature,
    /// Timestamp outside the replay window.
    #[error("request outside replay window ({age_secs}s)")]
    Stale { age_secs: u64 },
    /// No signing secret configured.
    #[error("signing secret not configured")]
    MissingSecret,
    /// Signature does not match the body.
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies request authenticity and freshness.
#[derive(Clone)]
pub struct SignatureValidator {
    signing_secret: String,
    replay_window: Duration,
}

impl std::fmt::Debug for SignatureValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureValidator")
            .field("replay_window", &self.replay_window)
            .finish_non_exhaustive()
    }
}

impl SignatureValidator {
    /// Create a validator with the default 300 second replay window.
    #[must_use]
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self::with_replay_window(signing_secret, DEFAULT_REPLAY_WINDOW)
    }

    /// Create a validator with a custom replay window.
    #[must_use]
    pub fn with_replay_window(signing_secret: impl Into<String>, replay_window: Duration) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            replay_window,
        }
    }

    /// Validate a request, logging the reason on failure.
    ///
    /// Never panics; every failure mode is a [`SignatureRejection`].
    pub fn validate(
        &self,
        raw_body: &[u8],
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureRejection> {
        let result = verify(
            raw_body,
            headers,
            &self.signing_secret,
            now,
            self.replay_window,
        );

        if let Err(reason) = &result {
            warn!(reason = %reason, body_len = raw_body.len(), "Rejected inbound request signature");
        }

        result
    }

    /// Convenience wrapper returning only the verdict.
    #[must_use]
    pub fn is_valid(&self, raw_body: &[u8], headers: &HeaderMap, now: DateTime<Utc>) -> bool {
        self.validate(raw_body, headers, now).is_ok()
    }
}

/// Verify a request signature against a secret.
pub fn verify(
    raw_body: &[u8],
    headers: &HeaderMap,
    signing_secret: &str,
    now: DateTime<Utc>,
    replay_window: Duration,
) -> Result<(), SignatureRejection> {
    let timestamp = header_value(headers, TIMESTAMP_HEADER)
        .ok_or(SignatureRejection::MissingTimestamp)?;
    let signature = header_value(headers, SIGNATURE_HEADER)
        .ok_or(SignatureRejection::MissingSignature)?;

    if signing_secret.is_empty() {
        return Err(SignatureRejection::MissingSecret);
    }

    let timestamp_secs: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureRejection::MalformedTimestamp)?;

    let age_secs = now.timestamp().abs_diff(timestamp_secs);
    if age_secs >= replay_window.as_secs() {
        return Err(SignatureRejection::Stale { age_secs });
    }

    let provided = signature
        .strip_prefix(&format!("{SIGNATURE_VERSION}="))
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(SignatureRejection::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| SignatureRejection::MissingSecret)?;
    mac.update(&base_string(timestamp, raw_body));

    // verify_slice compares in constant time
    mac.verify_slice(&provided)
        .map_err(|_| SignatureRejection::Mismatch)
}

/// Compute the `v0=` signature for a body, as the platform would.
#[must_use]
pub fn compute_signature(signing_secret: &str, timestamp: &str, raw_body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return String::new();
    };
    mac.update(&base_string(timestamp, raw_body));
    format!(
        "{SIGNATURE_VERSION}={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

fn base_string(timestamp: &str, raw_body: &[u8]) -> Vec<u8> {
    let mut base = Vec::with_capacity(SIGNATURE_VERSION.len() + timestamp.len() + raw_body.len() + 2);
    base.extend_from_slice(SIGNATURE_VERSION.as_bytes());
    base.push(b':');
    base.extend_from_slice(timestamp.as_bytes());
    base.push(b':');
    base.extend_from_slice(raw_body);
    base
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&command=%2Fweather";

    fn signed_headers(timestamp: i64, body: &[u8]) -> HeaderMap {
        let ts = timestamp.to_string();
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&ts).unwrap());
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&compute_signature(SECRET, &ts, body)).unwrap(),
        );
        headers
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_valid_signature_within_window() {
        let validator = SignatureValidator::new(SECRET);
        let headers = signed_headers(1_531_420_618, BODY);

        assert_eq!(validator.validate(BODY, &headers, at(1_531_420_618)), Ok(()));
        assert!(validator.is_valid(BODY, &headers, at(1_531_420_618 + 299)));
        assert!(validator.is_valid(BODY, &headers, at(1_531_420_618 - 299)));
    }

    #[test]
    fn test_replay_window_boundary_is_rejected() {
        let validator = SignatureValidator::new(SECRET);
        let ts = 1_700_000_000;
        let headers = signed_headers(ts, BODY);

        assert_eq!(
            validator.validate(BODY, &headers, at(ts + 300)),
            Err(SignatureRejection::Stale { age_secs: 300 })
        );
        assert_eq!(
            validator.validate(BODY, &headers, at(ts + 301)),
            Err(SignatureRejection::Stale { age_secs: 301 })
        );
        // Future-dated requests are rejected the same way
        assert!(!validator.is_valid(BODY, &headers, at(ts - 301)));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let validator = SignatureValidator::new(SECRET);
        let ts = 1_700_000_000;
        let headers = signed_headers(ts, BODY);

        assert_eq!(
            validator.validate(b"token=other", &headers, at(ts)),
            Err(SignatureRejection::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let validator = SignatureValidator::new("another-secret");
        let ts = 1_700_000_000;
        let headers = signed_headers(ts, BODY);

        assert!(!validator.is_valid(BODY, &headers, at(ts)));
    }

    #[test]
    fn test_missing_headers_fail_closed() {
        let validator = SignatureValidator::new(SECRET);
        let ts = 1_700_000_000;

        let mut headers = signed_headers(ts, BODY);
        headers.remove(SIGNATURE_HEADER);
        assert_eq!(
            validator.validate(BODY, &headers, at(ts)),
            Err(SignatureRejection::MissingSignature)
        );

        let mut headers = signed_headers(ts, BODY);
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static(""));
        assert_eq!(
            validator.validate(BODY, &headers, at(ts)),
            Err(SignatureRejection::MissingTimestamp)
        );
    }

    #[test]
    fn test_malformed_values_do_not_panic() {
        let validator = SignatureValidator::new(SECRET);
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("yesterday"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("v0=abc"));
        assert_eq!(
            validator.validate(BODY, &headers, at(0)),
            Err(SignatureRejection::MalformedTimestamp)
        );

        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("100"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("v1=zz"));
        assert_eq!(
            validator.validate(BODY, &headers, at(100)),
            Err(SignatureRejection::MalformedSignature)
        );

        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("-9223372036854775808"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("v0=00"));
        assert!(!validator.is_valid(BODY, &headers, at(i64::from(i32::MAX))));
    }

    #[test]
    fn test_missing_secret_fails_closed() {
        let validator = SignatureValidator::new("");
        let ts = 1_700_000_000;
        let headers = signed_headers(ts, BODY);

        assert_eq!(
            validator.validate(BODY, &headers, at(ts)),
            Err(SignatureRejection::MissingSecret)
        );
    }

    #[test]
    fn test_compute_signature_format() {
        let sig = compute_signature(SECRET, "1531420618", BODY);
        assert!(sig.starts_with("v0="));
        assert_eq!(sig.len(), 3 + 64);
    }
}
