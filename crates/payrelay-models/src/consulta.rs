//! Correlation identifier for a single consultation checkout.
//!
//! A [`ConsultaId`] ties the inbound checkout request, the downstream
//! invocation, and the payment preference together for tracking. Ids are
//! time-based (`web_<unix-millis>`): unique enough for log correlation and
//! idempotency-adjacent tracking, but not guaranteed globally unique. The
//! downstream service treats it as a hint, never as a primary key.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConsultaId
// ---------------------------------------------------------------------------

/// Correlation id for one checkout, in the form `web_<unix-millis>`.
///
/// # Examples
///
/// ```
/// use payrelay_models::ConsultaId;
///
/// let id = ConsultaId::generate();
/// assert!(id.as_str().starts_with("web_"));
///
/// let fixed = ConsultaId::new("web_1700000000000");
/// assert_eq!(fixed.to_string(), "web_1700000000000");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsultaId(String);

impl ConsultaId {
    /// Create a `ConsultaId` from an existing string (e.g. one echoed back
    /// by the downstream service).
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Generate a fresh id from the current wall-clock time.
    pub fn generate() -> Self {
        Self(format!("web_{}", Utc::now().timestamp_millis()))
    }

    /// Return the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsultaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsultaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConsultaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for ConsultaId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
