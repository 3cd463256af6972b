//! Error types for the payrelay gateway.
//!
//! [`GatewayError`] unifies every failure mode of the checkout pipeline.
//! Each error maps to one HTTP status and one machine-readable
//! [`ErrorCode`]; raw upstream bodies and other operator diagnostics are
//! only attached to the response when diagnostics are enabled in
//! configuration. All errors are terminal for the request — nothing here
//! triggers a retry.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use payrelay_models::ErrorCode;
use serde_json::json;

use crate::config::ConfigError;

/// The outbound step a transport-level failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The STS token exchange.
    Exchange,
    /// The id-token escalation.
    Escalation,
    /// The call to the private destination.
    Downstream,
}

/// Errors that can occur while handling a checkout request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request body was absent or not valid JSON.
    #[error("request body is not valid JSON")]
    InvalidJson,

    /// `name` missing or empty after trimming.
    #[error("missing name")]
    MissingName,

    /// `email` missing or without `@`.
    #[error("missing or malformed email")]
    MissingEmail,

    /// Debug mode requested without the matching admin key header.
    #[error("debug mode requires the admin key")]
    DebugNotAllowed,

    /// Debug mode requested by an email outside the allow-list.
    #[error("debug mode not allowed for email")]
    DebugEmailNotAllowed,

    /// Configuration was missing or invalid at request time.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The subject assertion could not be read.
    #[error("subject assertion unavailable: {0}")]
    AssertionUnavailable(String),

    /// The identity provider rejected the token exchange, or its reply
    /// carried no access token.
    #[error("token exchange rejected (status {status})")]
    ExchangeFailed {
        /// HTTP status returned by the STS endpoint.
        status: u16,
        /// Raw response body, for operator diagnosis.
        body: String,
    },

    /// The id-token escalation was rejected, or its reply carried no token.
    #[error("id-token escalation rejected (status {status})")]
    EscalationFailed {
        /// HTTP status returned by the credentials endpoint.
        status: u16,
        /// Raw response body, for operator diagnosis.
        body: String,
    },

    /// The destination rejected the invocation, errored, or replied
    /// without a truthy `ok`.
    #[error("destination call failed (status {status})")]
    DownstreamFailed {
        /// HTTP status returned by the destination.
        status: u16,
        /// Canonical status text.
        status_text: String,
        /// Response body, verbatim.
        raw: String,
    },

    /// An outbound call failed at the transport level (connect, deadline).
    #[error("{step:?} call failed in transport: {source}")]
    Transport {
        /// Which step the failure happened in.
        step: Step,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

impl GatewayError {
    /// The machine-readable discriminator for the failure envelope.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidJson => ErrorCode::InvalidJson,
            Self::MissingName => ErrorCode::MissingName,
            Self::MissingEmail => ErrorCode::MissingEmail,
            Self::DebugNotAllowed => ErrorCode::DebugNotAllowed,
            Self::DebugEmailNotAllowed => ErrorCode::DebugEmailNotAllowed,
            Self::Config(_) | Self::AssertionUnavailable(_) => ErrorCode::ConfigMissing,
            Self::ExchangeFailed { .. }
            | Self::Transport {
                step: Step::Exchange,
                ..
            } => ErrorCode::StsExchangeFailed,
            Self::EscalationFailed { .. }
            | Self::Transport {
                step: Step::Escalation,
                ..
            } => ErrorCode::GenerateIdTokenFailed,
            Self::DownstreamFailed { .. }
            | Self::Transport {
                step: Step::Downstream,
                ..
            } => ErrorCode::CloudRunError,
        }
    }

    /// The HTTP status of the failure envelope.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson | Self::MissingName | Self::MissingEmail => StatusCode::BAD_REQUEST,
            Self::DebugNotAllowed | Self::DebugEmailNotAllowed => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the `{ok:false, error, …}` envelope.
    ///
    /// With `diagnostics` off the envelope carries only the discriminator;
    /// with it on, the upstream status and raw body are included so an
    /// operator can tell a trust-configuration error from a transient one.
    pub fn into_response_with(self, diagnostics: bool) -> Response {
        let status = self.status();
        let code = self.code();
        tracing::error!(%status, code = code.as_str(), error = %self, "request failed");

        let mut body = json!({ "ok": false, "error": code });
        if diagnostics {
            match &self {
                Self::ExchangeFailed { status, body: raw } => {
                    body["details"] = json!({ "where": "sts", "status": status, "body": raw });
                }
                Self::EscalationFailed { status, body: raw } => {
                    body["details"] =
                        json!({ "where": "generateIdToken", "status": status, "body": raw });
                }
                Self::DownstreamFailed {
                    status,
                    status_text,
                    raw,
                } => {
                    body["status"] = json!(status);
                    body["statusText"] = json!(status_text);
                    body["raw"] = json!(raw);
                }
                Self::Config(e) => body["message"] = json!(e.to_string()),
                Self::Transport { .. } | Self::AssertionUnavailable(_) => {
                    body["message"] = json!(self.to_string());
                }
                _ => {}
            }
        }

        (status, Json(body)).into_response()
    }
}
