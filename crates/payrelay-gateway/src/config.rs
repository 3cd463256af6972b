//! Gateway configuration.
//!
//! All configuration is resolved **once** at startup into a single
//! [`AppConfig`] and injected into Axum handlers via
//! [`axum::extract::State`]. Legacy fallback variable names are declared in
//! one table ([`REQUIRED_KEYS`]); every missing required key is collected
//! and reported in a single [`ConfigError::Missing`] instead of failing
//! one key at a time.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Strategy flags
// ---------------------------------------------------------------------------

/// Wire encoding of the STS token-exchange request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeEncoding {
    /// JSON body with camelCase keys (the deployed default).
    Json,
    /// Form-encoded body with the RFC 8693 registered parameter names.
    Form,
}

impl FromStr for ExchangeEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "form" => Ok(Self::Form),
            other => Err(format!("expected \"json\" or \"form\", got \"{other}\"")),
        }
    }
}

/// How the federated access token is escalated to a service identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStrategy {
    /// Single `generateIdToken` call authenticated with the federated
    /// access token (the deployed default).
    Direct,
    /// Impersonation chain: a bounded-lifetime `generateAccessToken`
    /// first, then `generateIdToken` with the impersonated token.
    Impersonate,
}

impl FromStr for EscalationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "impersonate" => Ok(Self::Impersonate),
            other => Err(format!(
                "expected \"direct\" or \"impersonate\", got \"{other}\""
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Assertion source
// ---------------------------------------------------------------------------

/// Where the platform-issued subject assertion is read from on each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionSource {
    /// A projected token file, re-read per request (the platform rotates it).
    File(PathBuf),
    /// A fixed value injected through the environment at process start.
    Inline(String),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Startup configuration failures. Fatal; the process refuses to serve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// One or more required keys were unset (all of them are listed).
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// A key was set to a value that does not parse.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// The offending environment variable.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Required keys and their legacy fallback names, in resolution order.
const REQUIRED_KEYS: &[(&str, Option<&str>)] = &[
    ("GCP_PROJECT_NUMBER", None),
    ("GCP_WIF_POOL_ID", Some("GCP_WORKLOAD_IDENTITY_POOL_ID")),
    (
        "GCP_WIF_PROVIDER_ID",
        Some("GCP_WORKLOAD_IDENTITY_POOL_PROVIDER_ID"),
    ),
    ("GCP_SERVICE_ACCOUNT", Some("GCP_SERVICE_ACCOUNT_EMAIL")),
    ("GCP_TARGET_URL", Some("MP_PREF_URL")),
    ("ADMIN_KEY", None),
];

/// Default STS token endpoint.
const DEFAULT_STS_URL: &str = "https://sts.googleapis.com/v1/token";
/// Default IAM credentials API base.
const DEFAULT_IAM_URL: &str = "https://iamcredentials.googleapis.com";

/// Global configuration shared across all handlers.
///
/// | Variable | Fallback | Default | Description |
/// |----------|----------|---------|-------------|
/// | `GCP_PROJECT_NUMBER` | — | required | federation project number |
/// | `GCP_WIF_POOL_ID` | `GCP_WORKLOAD_IDENTITY_POOL_ID` | required | workload identity pool |
/// | `GCP_WIF_PROVIDER_ID` | `GCP_WORKLOAD_IDENTITY_POOL_PROVIDER_ID` | required | pool provider |
/// | `GCP_SERVICE_ACCOUNT` | `GCP_SERVICE_ACCOUNT_EMAIL` | required | service principal |
/// | `GCP_TARGET_URL` | `MP_PREF_URL` | required | private destination URL |
/// | `GCP_AUDIENCE` | — | target URL | id-token audience |
/// | `ADMIN_KEY` | — | required | shared secret header value |
/// | `SUBJECT_TOKEN_FILE` / `SUBJECT_TOKEN` | — | one required | assertion source |
/// | `GCP_STS_URL` | — | Google STS | token-exchange endpoint |
/// | `GCP_IAM_URL` | — | Google IAM | credentials API base |
/// | `CONSULTA_AMOUNT` | — | `100000` | fixed price (smallest unit) |
/// | `CONSULTA_TITLE` | — | `Consulta Jurídica` | preference title |
/// | `DEBUG_EMAIL_ALLOWLIST` | — | empty | comma-separated emails |
/// | `PAYRELAY_DIAGNOSTICS` | — | off | verbose failure envelopes |
/// | `EXCHANGE_ENCODING` | — | `json` | `json` \| `form` |
/// | `ESCALATION_STRATEGY` | — | `direct` | `direct` \| `impersonate` |
/// | `OUTBOUND_TIMEOUT_SECS` | — | `10` | deadline per outbound call |
/// | `PAYRELAY_PORT` | — | `3001` | HTTP listen port |
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Federation project number.
    pub project_number: String,
    /// Workload identity pool id.
    pub pool_id: String,
    /// Workload identity pool provider id.
    pub provider_id: String,
    /// Service principal to escalate to (email-like identifier).
    pub service_account: String,
    /// Private destination endpoint.
    pub target_url: String,
    /// Audience the id token is bound to (defaults to `target_url`).
    pub audience_url: String,
    /// Shared secret sent as `x-admin-key` and required for debug mode.
    pub admin_key: String,
    /// STS token-exchange endpoint.
    pub sts_url: String,
    /// IAM credentials API base URL.
    pub iam_url: String,
    /// Where the subject assertion is read from per request.
    pub assertion: AssertionSource,
    /// Fixed consultation price in the smallest currency unit.
    pub amount: i64,
    /// Display title for the payment preference.
    pub title: String,
    /// Lowercased emails allowed to use debug mode.
    pub debug_allowlist: Vec<String>,
    /// Whether failure envelopes carry raw upstream diagnostics.
    pub diagnostics: bool,
    /// STS request encoding.
    pub exchange_encoding: ExchangeEncoding,
    /// Id-token escalation strategy.
    pub escalation_strategy: EscalationStrategy,
    /// Deadline applied to every outbound call.
    pub outbound_timeout: Duration,
    /// Port to listen on.
    pub listen_port: u16,
}

impl AppConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty and whitespace-only values count as unset, matching how the
    /// deployment platform represents cleared variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_with_fallback = |key: &str, fallback: Option<&str>| -> Option<String> {
            get(key).or_else(|| fallback.and_then(get))
        };

        // Required keys first, collecting every absence before failing.
        let mut missing = Vec::new();
        let mut resolved = Vec::with_capacity(REQUIRED_KEYS.len());
        for &(key, fallback) in REQUIRED_KEYS {
            match get_with_fallback(key, fallback) {
                Some(v) => resolved.push(v),
                None => {
                    missing.push(match fallback {
                        Some(f) => format!("{key} (or {f})"),
                        None => key.to_string(),
                    });
                    resolved.push(String::new());
                }
            }
        }

        let assertion = match (get("SUBJECT_TOKEN_FILE"), get("SUBJECT_TOKEN")) {
            (Some(path), _) => Some(AssertionSource::File(PathBuf::from(path))),
            (None, Some(token)) => Some(AssertionSource::Inline(token)),
            (None, None) => {
                missing.push("SUBJECT_TOKEN_FILE (or SUBJECT_TOKEN)".to_string());
                None
            }
        };

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let mut resolved = resolved.into_iter();
        let project_number = resolved.next().unwrap_or_default();
        let pool_id = resolved.next().unwrap_or_default();
        let provider_id = resolved.next().unwrap_or_default();
        let service_account = resolved.next().unwrap_or_default();
        let target_url = resolved.next().unwrap_or_default();
        let admin_key = resolved.next().unwrap_or_default();

        let audience_url = get("GCP_AUDIENCE").unwrap_or_else(|| target_url.clone());

        let exchange_encoding =
            parse_key("EXCHANGE_ENCODING", get("EXCHANGE_ENCODING"))?.unwrap_or(ExchangeEncoding::Json);
        let escalation_strategy = parse_key("ESCALATION_STRATEGY", get("ESCALATION_STRATEGY"))?
            .unwrap_or(EscalationStrategy::Direct);

        let amount =
            parse_key::<i64>("CONSULTA_AMOUNT", get("CONSULTA_AMOUNT"))?.unwrap_or(100_000);
        let outbound_timeout = Duration::from_secs(
            parse_key("OUTBOUND_TIMEOUT_SECS", get("OUTBOUND_TIMEOUT_SECS"))?.unwrap_or(10),
        );
        let listen_port =
            parse_key::<u16>("PAYRELAY_PORT", get("PAYRELAY_PORT"))?.unwrap_or(3001);

        let debug_allowlist = get("DEBUG_EMAIL_ALLOWLIST")
            .map(|v| {
                v.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let diagnostics = get("PAYRELAY_DIAGNOSTICS")
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Self {
            project_number,
            pool_id,
            provider_id,
            service_account,
            target_url,
            audience_url,
            admin_key,
            sts_url: get("GCP_STS_URL").unwrap_or_else(|| DEFAULT_STS_URL.to_string()),
            iam_url: get("GCP_IAM_URL").unwrap_or_else(|| DEFAULT_IAM_URL.to_string()),
            assertion: assertion.expect("checked above"),
            amount,
            title: get("CONSULTA_TITLE").unwrap_or_else(|| "Consulta Jurídica".to_string()),
            debug_allowlist,
            diagnostics,
            exchange_encoding,
            escalation_strategy,
            outbound_timeout,
            listen_port,
        })
    }
}

/// Parse an optional value for `key`, turning parse failures into
/// [`ConfigError::Invalid`].
fn parse_key<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
