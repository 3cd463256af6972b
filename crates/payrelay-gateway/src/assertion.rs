//! Subject-assertion acquisition.
//!
//! The hosting platform issues a short-lived OIDC assertion for the
//! workload, either as a projected token file (rotated by the platform) or
//! injected through the environment. The assertion is read fresh on every
//! request and used exactly once per exchange — nothing is cached.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::config::AssertionSource;
use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// SubjectAssertion
// ---------------------------------------------------------------------------

/// An opaque platform-issued identity assertion.
///
/// The `Debug` impl is redacted: assertion values must never reach logs
/// or error envelopes.
pub struct SubjectAssertion(String);

impl SubjectAssertion {
    /// The raw assertion, for use as an STS subject token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Structural claims from an **unverified** decode of the payload
    /// segment. For gated diagnostics only; returns `None` for anything
    /// that does not look like a JWT.
    pub fn claims(&self) -> Option<AssertionClaims> {
        let payload = self.0.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl fmt::Debug for SubjectAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubjectAssertion(<redacted>)")
    }
}

/// Issuer / audience / subject of the assertion, for diagnostics.
///
/// `aud` is kept as a raw JSON value: providers emit both a single string
/// and an array of strings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    /// Token issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Token audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Token subject.
    #[serde(default)]
    pub sub: Option<String>,
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

/// Read the subject assertion from the configured source.
///
/// A projected token file is re-read on every call so platform rotation is
/// picked up without a restart. An unreadable or empty source is a
/// configuration-level failure, reported before any outbound call is made.
pub fn load(source: &AssertionSource) -> Result<SubjectAssertion, GatewayError> {
    let raw = match source {
        AssertionSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
            GatewayError::AssertionUnavailable(format!("read {}: {e}", path.display()))
        })?,
        AssertionSource::Inline(value) => value.clone(),
    };

    let token = raw.trim();
    if token.is_empty() {
        return Err(GatewayError::AssertionUnavailable(
            "subject token is empty".to_string(),
        ));
    }
    Ok(SubjectAssertion(token.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
