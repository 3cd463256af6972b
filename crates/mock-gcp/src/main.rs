//! Local stand-in for the three upstreams the payrelay gateway talks to:
//! the STS token-exchange endpoint, the IAM credentials API, and the
//! private preference destination. Point the gateway at it with:
//!
//! ```text
//! GCP_STS_URL=http://localhost:4000/v1/token
//! GCP_IAM_URL=http://localhost:4000
//! GCP_TARGET_URL=http://localhost:4000/preference
//! ```

use axum::{
    body::Bytes,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::{pkcs1::EncodeRsaPrivateKey, RsaPrivateKey};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

// Global signing key for the fabricated id tokens
struct MockKeys {
    encoding_key: EncodingKey,
}

static KEYS: OnceLock<MockKeys> = OnceLock::new();

fn admin_key() -> String {
    std::env::var("ADMIN_KEY").unwrap_or_else(|_| "dev-admin-key".to_string())
}

#[tokio::main]
async fn main() {
    // 1. Generate an RSA key pair on startup
    println!("MOCK-GCP: Generating RSA-2048 signing key...");
    let mut rng = rand::thread_rng();
    let priv_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate private key");
    let priv_pem = priv_key.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF).unwrap();
    let encoding_key = EncodingKey::from_rsa_pem(priv_pem.as_bytes()).unwrap();

    KEYS.set(MockKeys { encoding_key }).ok().unwrap();

    // 2. Setup routes
    let app = Router::new()
        .route("/v1/token", post(sts_token))
        .route(
            "/v1/projects/-/serviceAccounts/{operation}",
            post(credentials_operation),
        )
        .route("/preference", post(preference));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await.unwrap();
    println!("MOCK-GCP: Listening on http://localhost:4000 (admin key: {})", admin_key());
    axum::serve(listener, app).await.unwrap();
}

// --- STS token exchange ---

/// Accepts both encodings the gateway can send: JSON with camelCase keys
/// and form-encoded with the RFC 8693 registered names.
async fn sts_token(headers: HeaderMap, raw: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let subject_token = if content_type.starts_with("application/json") {
        serde_json::from_slice::<Value>(&raw)
            .ok()
            .and_then(|v| v["subjectToken"].as_str().map(String::from))
    } else {
        form_subject_token(&raw)
    };

    let Some(subject_token) = subject_token else {
        println!("MOCK-GCP: STS request without a subject token ({content_type})");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_request" })),
        )
            .into_response();
    };

    println!(
        "MOCK-GCP: STS exchange ok (subject token {} bytes, {content_type})",
        subject_token.len()
    );
    Json(json!({
        "access_token": format!("federated_{}", Utc::now().timestamp_millis()),
        "issued_token_type": "urn:ietf:params:oauth:token-type:access_token",
        "token_type": "Bearer",
        "expires_in": 3599
    }))
    .into_response()
}

/// Decodes the urlencoded body with the same codec axum's `Form`
/// extractor uses and pulls out `subject_token`.
fn form_subject_token(raw: &[u8]) -> Option<String> {
    let mut fields: HashMap<String, String> = serde_urlencoded::from_bytes(raw).ok()?;
    fields.remove("subject_token")
}

// --- IAM credentials ---

#[derive(Serialize)]
struct IdTokenClaims {
    iss: String,
    aud: String,
    sub: String,
    email: String,
    exp: i64,
    iat: i64,
}

/// `{email}:generateIdToken` and `{email}:generateAccessToken`.
async fn credentials_operation(
    Path(operation): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !bearer.starts_with("Bearer ") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "status": "UNAUTHENTICATED" } })),
        )
            .into_response();
    }

    if let Some(email) = operation.strip_suffix(":generateAccessToken") {
        println!("MOCK-GCP: generateAccessToken for {email} (lifetime {})", body["lifetime"]);
        return Json(json!({
            "accessToken": format!("impersonated_{}", Utc::now().timestamp_millis()),
            "expireTime": (Utc::now() + Duration::seconds(300)).to_rfc3339(),
        }))
        .into_response();
    }

    let Some(email) = operation.strip_suffix(":generateIdToken") else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "status": "NOT_FOUND" } })),
        )
            .into_response();
    };

    let Some(audience) = body["audience"].as_str() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "status": "INVALID_ARGUMENT" } })),
        )
            .into_response();
    };

    println!("MOCK-GCP: generateIdToken for {email}, audience {audience}");

    let now = Utc::now();
    let claims = IdTokenClaims {
        iss: "https://accounts.google.com".to_string(),
        aud: audience.to_string(),
        sub: format!("mock-{email}"),
        email: email.to_string(),
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
    };

    let keys = KEYS.get().unwrap();
    let header = Header {
        kid: Some("mock-key-1".to_string()),
        alg: Algorithm::RS256,
        ..Default::default()
    };
    let token = encode(&header, &claims, &keys.encoding_key).unwrap();

    Json(json!({ "token": token })).into_response()
}

// --- Destination ---

/// The private preference service: requires a bearer id token plus the
/// shared `x-admin-key`, replies with a fabricated payment preference.
async fn preference(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let bearer_ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "));
    let admin_ok = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == admin_key());

    if !bearer_ok || !admin_ok {
        println!("MOCK-GCP: preference call rejected (bearer_ok={bearer_ok}, admin_ok={admin_ok})");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "ok": false, "error": "forbidden" })),
        )
            .into_response();
    }

    let consulta_id = body["consultaId"].as_str().unwrap_or("unknown");
    let pref_id = format!("mock-pref-{}", Utc::now().timestamp_millis());
    println!(
        "MOCK-GCP: preference created for {consulta_id} ({} x {})",
        body["title"], body["amount"]
    );

    Json(json!({
        "ok": true,
        "consultaId": consulta_id,
        "preferenceId": pref_id,
        "init_point": format!("https://pay.example/checkout/{pref_id}"),
        "sandbox_init_point": format!("https://sandbox.pay.example/checkout/{pref_id}"),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_percent_escapes_decode() {
        let raw = b"grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange\
                    &subject_token=tok%40en+extra";
        assert_eq!(form_subject_token(raw).as_deref(), Some("tok@en extra"));
    }

    #[test]
    fn malformed_percent_escapes_are_not_mangled() {
        // Invalid or truncated escapes stay verbatim instead of being
        // substituted with other bytes.
        assert_eq!(
            form_subject_token(b"subject_token=tok%ZZen").as_deref(),
            Some("tok%ZZen")
        );
        assert_eq!(
            form_subject_token(b"subject_token=tok%4").as_deref(),
            Some("tok%4")
        );
    }

    #[test]
    fn missing_field_is_none() {
        assert_eq!(form_subject_token(b"grant_type=refresh"), None);
    }
}
