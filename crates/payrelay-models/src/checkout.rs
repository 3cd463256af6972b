//! Checkout request / response wire types.
//!
//! Field names follow the JSON contract of the deployed services, which is
//! camelCase for ids (`consultaId`, `preferenceId`) and snake_case for the
//! payment-provider redirect links (`init_point`, `sandbox_init_point`).
//! Serde renames keep the Rust side idiomatic.

use serde::{Deserialize, Serialize};

use crate::consulta::ConsultaId;

// ---------------------------------------------------------------------------
// CheckoutRequest
// ---------------------------------------------------------------------------

/// Inbound body of `POST /api/checkout`.
///
/// `debug` and `testAmount` are only honored for callers that pass the
/// admin-key / allow-list gate; for everyone else the configured price is
/// used regardless of what is supplied here.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct CheckoutRequest {
    /// Customer name. Required, validated non-empty after trimming.
    pub name: String,
    /// Customer email. Required, must contain `@`; lowercased on intake.
    pub email: String,
    /// Request debug mode (gated).
    pub debug: bool,
    /// Override amount for gated test checkouts.
    #[serde(rename = "testAmount")]
    pub test_amount: Option<i64>,
}

// ---------------------------------------------------------------------------
// InvocationEnvelope
// ---------------------------------------------------------------------------

/// Body of the authorized call to the private destination service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InvocationEnvelope {
    /// Correlation id generated by the gateway for this checkout.
    #[serde(rename = "consultaId")]
    pub consulta_id: ConsultaId,
    /// Display title for the payment preference.
    pub title: String,
    /// Amount in the smallest currency unit.
    pub amount: i64,
    /// Customer email, forwarded for the payment preference.
    pub email: String,
    /// Customer name, forwarded for the payment preference.
    pub name: String,
}

// ---------------------------------------------------------------------------
// CheckoutSuccess
// ---------------------------------------------------------------------------

/// Caller-facing reply when the whole pipeline succeeded.
///
/// `preferenceId` and the redirect links are passed through from the
/// downstream reply unchanged; `consultaId` is the downstream value when
/// present, otherwise the gateway's locally generated id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSuccess {
    /// Always `true` on this type.
    pub ok: bool,
    /// Correlation id for the checkout.
    #[serde(rename = "consultaId")]
    pub consulta_id: ConsultaId,
    /// Payment-provider preference id.
    #[serde(rename = "preferenceId", skip_serializing_if = "Option::is_none")]
    pub preference_id: Option<String>,
    /// Live checkout redirect URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_point: Option<String>,
    /// Sandbox checkout redirect URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_init_point: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
