//! Workload-identity credential exchange.
//!
//! Two hops turn the platform assertion into a bearer credential for the
//! private destination, with no long-lived secret anywhere:
//!
//! 1. [`exchange_for_access_token`] — STS token exchange (RFC 8693): the
//!    subject assertion becomes a cloud access token scoped to the
//!    workload-identity pool audience.
//! 2. [`escalate_to_service_identity`] — the access token becomes a
//!    short-lived id token asserting the service principal, bound to the
//!    destination audience. Either a direct `generateIdToken` call or an
//!    impersonation chain, per configuration.
//!
//! Both tokens are request-local and used exactly once. Any failure is
//! terminal for the request; there are no retries.

use std::fmt;

use serde_json::json;
use tracing::debug;

use crate::assertion::SubjectAssertion;
use crate::config::{AppConfig, EscalationStrategy, ExchangeEncoding};
use crate::error::{GatewayError, Step};

/// Token-exchange grant type (RFC 8693).
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// Requested token type: an OAuth access token.
pub const TOKEN_TYPE_ACCESS: &str = "urn:ietf:params:oauth:token-type:access_token";
/// Subject token type: the platform assertion is an OIDC id token.
pub const TOKEN_TYPE_ID: &str = "urn:ietf:params:oauth:token-type:id_token";
/// Administrative scope requested on the exchanged token.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Bounded lifetime of the intermediate token on the impersonation chain.
const IMPERSONATION_LIFETIME: &str = "300s";

// ---------------------------------------------------------------------------
// Token newtypes
// ---------------------------------------------------------------------------

/// Access token returned by the STS exchange. Redacted `Debug`.
pub struct FederatedAccessToken(String);

impl FederatedAccessToken {
    /// The raw bearer value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FederatedAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FederatedAccessToken(<redacted>)")
    }
}

/// Id token asserting the service principal, bound to the destination
/// audience. Redacted `Debug`.
pub struct ServiceIdentityToken(String);

impl ServiceIdentityToken {
    /// The raw bearer value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ServiceIdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceIdentityToken(<redacted>)")
    }
}

/// Construct a [`ServiceIdentityToken`] directly; sibling module tests
/// need one without running the exchange.
#[cfg(test)]
pub fn test_identity_token(value: &str) -> ServiceIdentityToken {
    ServiceIdentityToken(value.to_string())
}

// ---------------------------------------------------------------------------
// Hop 1: STS token exchange
// ---------------------------------------------------------------------------

/// Audience string identifying the workload-identity trust relationship.
pub fn pool_audience(cfg: &AppConfig) -> String {
    format!(
        "//iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
        cfg.project_number, cfg.pool_id, cfg.provider_id
    )
}

/// Exchange the subject assertion for a federated access token.
///
/// The request encoding follows `cfg.exchange_encoding`: JSON with
/// camelCase keys, or form-encoded with the RFC 8693 registered names.
/// A non-2xx reply or a reply without `access_token` fails with
/// [`GatewayError::ExchangeFailed`] carrying the status and raw body.
pub async fn exchange_for_access_token(
    client: &reqwest::Client,
    cfg: &AppConfig,
    assertion: &SubjectAssertion,
) -> Result<FederatedAccessToken, GatewayError> {
    let audience = pool_audience(cfg);

    let request = match cfg.exchange_encoding {
        ExchangeEncoding::Json => client.post(&cfg.sts_url).json(&json!({
            "audience": audience,
            "grantType": GRANT_TYPE_TOKEN_EXCHANGE,
            "requestedTokenType": TOKEN_TYPE_ACCESS,
            "scope": CLOUD_PLATFORM_SCOPE,
            "subjectTokenType": TOKEN_TYPE_ID,
            "subjectToken": assertion.as_str(),
        })),
        ExchangeEncoding::Form => client.post(&cfg.sts_url).form(&[
            ("audience", audience.as_str()),
            ("grant_type", GRANT_TYPE_TOKEN_EXCHANGE),
            ("requested_token_type", TOKEN_TYPE_ACCESS),
            ("scope", CLOUD_PLATFORM_SCOPE),
            ("subject_token_type", TOKEN_TYPE_ID),
            ("subject_token", assertion.as_str()),
        ]),
    };

    let response = request.send().await.map_err(|source| GatewayError::Transport {
        step: Step::Exchange,
        source,
    })?;
    let status = response.status();
    let body = response.text().await.map_err(|source| GatewayError::Transport {
        step: Step::Exchange,
        source,
    })?;

    match token_field(status.is_success(), &body, "access_token") {
        Some(token) => {
            debug!(audience = %audience, "federated access token obtained");
            Ok(FederatedAccessToken(token))
        }
        None => Err(GatewayError::ExchangeFailed {
            status: status.as_u16(),
            body,
        }),
    }
}

// ---------------------------------------------------------------------------
// Hop 2: id-token escalation
// ---------------------------------------------------------------------------

/// Escalate the federated access token to a service identity token bound
/// to the configured audience.
pub async fn escalate_to_service_identity(
    client: &reqwest::Client,
    cfg: &AppConfig,
    access: &FederatedAccessToken,
) -> Result<ServiceIdentityToken, GatewayError> {
    match cfg.escalation_strategy {
        EscalationStrategy::Direct => generate_id_token(client, cfg, access.as_str()).await,
        EscalationStrategy::Impersonate => {
            let impersonated = generate_access_token(client, cfg, access).await?;
            generate_id_token(client, cfg, impersonated.as_str()).await
        }
    }
}

/// URL of an IAM credentials operation on the configured service account.
fn credentials_url(cfg: &AppConfig, operation: &str) -> String {
    format!(
        "{}/v1/projects/-/serviceAccounts/{}:{operation}",
        cfg.iam_url.trim_end_matches('/'),
        cfg.service_account
    )
}

/// `generateIdToken`: id token bound to the destination audience, with the
/// principal's email embedded as a claim.
async fn generate_id_token(
    client: &reqwest::Client,
    cfg: &AppConfig,
    bearer: &str,
) -> Result<ServiceIdentityToken, GatewayError> {
    let response = client
        .post(credentials_url(cfg, "generateIdToken"))
        .bearer_auth(bearer)
        .json(&json!({
            "audience": cfg.audience_url,
            "includeEmail": true,
        }))
        .send()
        .await
        .map_err(|source| GatewayError::Transport {
            step: Step::Escalation,
            source,
        })?;
    let status = response.status();
    let body = response.text().await.map_err(|source| GatewayError::Transport {
        step: Step::Escalation,
        source,
    })?;

    match token_field(status.is_success(), &body, "token") {
        Some(token) => {
            debug!(audience = %cfg.audience_url, "service identity token obtained");
            Ok(ServiceIdentityToken(token))
        }
        None => Err(GatewayError::EscalationFailed {
            status: status.as_u16(),
            body,
        }),
    }
}

/// `generateAccessToken`: bounded-lifetime impersonated access token, the
/// intermediate hop of the impersonation chain.
async fn generate_access_token(
    client: &reqwest::Client,
    cfg: &AppConfig,
    access: &FederatedAccessToken,
) -> Result<FederatedAccessToken, GatewayError> {
    let response = client
        .post(credentials_url(cfg, "generateAccessToken"))
        .bearer_auth(access.as_str())
        .json(&json!({
            "scope": [CLOUD_PLATFORM_SCOPE],
            "lifetime": IMPERSONATION_LIFETIME,
        }))
        .send()
        .await
        .map_err(|source| GatewayError::Transport {
            step: Step::Escalation,
            source,
        })?;
    let status = response.status();
    let body = response.text().await.map_err(|source| GatewayError::Transport {
        step: Step::Escalation,
        source,
    })?;

    match token_field(status.is_success(), &body, "accessToken") {
        Some(token) => {
            debug!(principal = %cfg.service_account, "impersonated access token obtained");
            Ok(FederatedAccessToken(token))
        }
        None => Err(GatewayError::EscalationFailed {
            status: status.as_u16(),
            body,
        }),
    }
}

/// Extract a string token field from a reply, treating a non-success
/// status, an unparseable body, or an absent field alike as "no token".
fn token_field(success: bool, body: &str, field: &str) -> Option<String> {
    if !success {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get(field)?
        .as_str()
        .map(String::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
