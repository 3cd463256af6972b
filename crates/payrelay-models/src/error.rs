//! Machine-readable error discriminators.
//!
//! Every failure envelope the gateway returns carries exactly one
//! [`ErrorCode`] in its `error` field, so callers and monitoring can branch
//! on a stable string without parsing human-readable detail.

use serde::{Deserialize, Serialize};

/// The `error` discriminator of a `{ok:false, …}` envelope.
///
/// Serialises as the snake_case wire string, e.g.
/// `ErrorCode::StsExchangeFailed` → `"sts_exchange_failed"`.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    /// Request body was absent or not valid JSON.
    InvalidJson,
    /// `name` was missing or empty after trimming.
    MissingName,
    /// `email` was missing or did not contain `@`.
    MissingEmail,
    /// Required configuration keys are unset.
    ConfigMissing,
    /// The identity provider rejected the token exchange.
    StsExchangeFailed,
    /// The service-account id-token escalation failed.
    GenerateIdTokenFailed,
    /// The private destination rejected or errored the invocation.
    CloudRunError,
    /// Debug mode requested without the matching admin key.
    DebugNotAllowed,
    /// Debug mode requested by an email outside the allow-list.
    DebugEmailNotAllowed,
}

impl ErrorCode {
    /// The stable wire string for this code.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_stable() {
        assert_eq!(ErrorCode::StsExchangeFailed.as_str(), "sts_exchange_failed");
        assert_eq!(
            ErrorCode::GenerateIdTokenFailed.as_str(),
            "generate_id_token_failed"
        );
        assert_eq!(ErrorCode::CloudRunError.as_str(), "cloud_run_error");
        assert_eq!(ErrorCode::DebugNotAllowed.as_str(), "debug_not_allowed");
        assert_eq!(
            ErrorCode::DebugEmailNotAllowed.as_str(),
            "debug_email_not_allowed"
        );
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&ErrorCode::CloudRunError).unwrap();
        assert_eq!(json, "\"cloud_run_error\"");
        assert_eq!(ErrorCode::CloudRunError.to_string(), "cloud_run_error");
    }

    #[test]
    fn deserialises_from_wire_string() {
        let code: ErrorCode = serde_json::from_str("\"missing_email\"").unwrap();
        assert_eq!(code, ErrorCode::MissingEmail);
    }

    #[test]
    fn unknown_wire_strings_are_rejected() {
        // The set is closed; strings outside it do not parse.
        assert!(serde_json::from_str::<ErrorCode>("\"server_error\"").is_err());
    }
}
