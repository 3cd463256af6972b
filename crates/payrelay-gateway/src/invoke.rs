//! Authorized invocation of the private destination.
//!
//! Attaches the service identity token as a bearer credential plus the
//! static `x-admin-key` shared secret, posts the invocation envelope, and
//! normalises whatever comes back into the caller-facing shape. The body
//! is read as text first — the destination is not trusted to return JSON —
//! and an unparseable body is treated as "no structured reply", not as a
//! distinct error.

use payrelay_models::{CheckoutSuccess, ConsultaId, InvocationEnvelope};
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{GatewayError, Step};
use crate::federation::ServiceIdentityToken;

/// Shared-secret header required by the destination (and by debug mode on
/// the inbound side).
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Call the destination and normalise the result.
///
/// Success requires both an HTTP 2xx status and a truthy `ok` in the
/// parsed body; every other combination fails with
/// [`GatewayError::DownstreamFailed`] carrying the status, status text,
/// and the body verbatim. On success the downstream fields are reshaped
/// into [`CheckoutSuccess`], falling back to the locally generated
/// correlation id when the destination omitted one.
pub async fn invoke(
    client: &reqwest::Client,
    cfg: &AppConfig,
    token: &ServiceIdentityToken,
    envelope: &InvocationEnvelope,
) -> Result<CheckoutSuccess, GatewayError> {
    let response = client
        .post(&cfg.target_url)
        .bearer_auth(token.as_str())
        .header(ADMIN_KEY_HEADER, &cfg.admin_key)
        .json(envelope)
        .send()
        .await
        .map_err(|source| GatewayError::Transport {
            step: Step::Downstream,
            source,
        })?;

    let status = response.status();
    let raw = response.text().await.map_err(|source| GatewayError::Transport {
        step: Step::Downstream,
        source,
    })?;

    // Text first, JSON second; a parse failure just means no structured body.
    let data: Option<Value> = serde_json::from_str(&raw).ok();
    let accepted = status.is_success()
        && data
            .as_ref()
            .is_some_and(|body| is_truthy(body.get("ok")));

    if !accepted {
        return Err(GatewayError::DownstreamFailed {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            raw,
        });
    }

    let data = data.unwrap_or(Value::Null);
    debug!(consulta = %envelope.consulta_id, status = status.as_u16(), "destination accepted invocation");

    Ok(CheckoutSuccess {
        ok: true,
        consulta_id: data
            .get("consultaId")
            .and_then(Value::as_str)
            .map_or_else(|| envelope.consulta_id.clone(), ConsultaId::new),
        preference_id: string_field(&data, "preferenceId"),
        init_point: string_field(&data, "init_point"),
        sandbox_init_point: string_field(&data, "sandbox_init_point"),
    })
}

fn string_field(data: &Value, field: &str) -> Option<String> {
    data.get(field).and_then(Value::as_str).map(String::from)
}

/// JavaScript-style truthiness for the downstream `ok` flag. The deployed
/// destinations are JS services; `"ok": 1` and `"ok": "yes"` count.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Bool(true)) => true,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
