//! Payrelay gateway — authorizes and relays checkout requests to a
//! privately-deployed preference service.
//!
//! On each `POST /api/checkout` the gateway:
//!
//! 1. Validates the request and the (gated) debug options.
//! 2. Exchanges the platform assertion for a federated access token, then
//!    escalates it to a service identity token bound to the destination.
//! 3. Calls the private destination with the identity token plus the
//!    `x-admin-key` shared secret, and returns one uniform envelope.
//!
//! All three outbound calls run in sequence with a configured deadline;
//! the first failure aborts the rest of the pipeline.

mod assertion;
mod config;
mod error;
mod federation;
mod invoke;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use payrelay_models::{CheckoutRequest, CheckoutSuccess, ConsultaId, InvocationEnvelope};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::invoke::ADMIN_KEY_HEADER;

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared across all Axum handlers.
pub struct AppState {
    /// Global configuration, resolved once at startup.
    pub config: AppConfig,
    /// HTTP client for all outbound calls, with the configured deadline.
    pub http: reqwest::Client,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the gateway router over the given state.
fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/checkout", post(create_checkout))
        .route("/healthz", get(healthz))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /healthz` — liveness probe.
async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /api/checkout` — run the full checkout pipeline.
async fn create_checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Response {
    let diagnostics = state.config.diagnostics;
    match checkout_pipeline(&state, &headers, body).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => e.into_response_with(diagnostics),
    }
}

/// Validate, acquire credentials, invoke, and reshape.
async fn checkout_pipeline(
    state: &AppState,
    headers: &HeaderMap,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<CheckoutSuccess, GatewayError> {
    let Json(request) = body.map_err(|_| GatewayError::InvalidJson)?;

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(GatewayError::MissingName);
    }
    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(GatewayError::MissingEmail);
    }

    // Debug gate: exact admin-key match plus allow-listed email, checked
    // before anything leaves the process. Only a gated debug request may
    // deviate from the configured price.
    let amount = if request.debug {
        let presented = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
        if presented != Some(state.config.admin_key.as_str()) {
            return Err(GatewayError::DebugNotAllowed);
        }
        if !state.config.debug_allowlist.contains(&email) {
            return Err(GatewayError::DebugEmailNotAllowed);
        }
        request.test_amount.unwrap_or(state.config.amount)
    } else {
        state.config.amount
    };

    let consulta_id = ConsultaId::generate();
    info!(consulta = %consulta_id, debug = request.debug, "checkout request received");

    // Hop 0: the platform assertion, read fresh for this request. Claims
    // diagnostics are reserved for gated debug traffic.
    let assertion = assertion::load(&state.config.assertion)?;
    if state.config.diagnostics && request.debug {
        if let Some(claims) = assertion.claims() {
            debug!(
                issuer = ?claims.iss,
                audience = ?claims.aud,
                subject = ?claims.sub,
                "subject assertion claims"
            );
        }
    }

    // Hops 1 and 2: federated access token, then service identity token.
    let access =
        federation::exchange_for_access_token(&state.http, &state.config, &assertion).await?;
    let identity =
        federation::escalate_to_service_identity(&state.http, &state.config, &access).await?;
    info!(consulta = %consulta_id, "service identity acquired");

    // Hop 3: the authorized call to the destination.
    let envelope = InvocationEnvelope {
        consulta_id: consulta_id.clone(),
        title: state.config.title.clone(),
        amount,
        email,
        name,
    };
    let reply = invoke::invoke(&state.http, &state.config, &identity, &envelope).await?;
    info!(consulta = %reply.consulta_id, "preference created");

    Ok(reply)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Configuration: fail fast with every missing key listed at once.
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "refusing to start");
            std::process::exit(1);
        }
    };

    info!(
        sts = %config.sts_url,
        target = %config.target_url,
        encoding = ?config.exchange_encoding,
        strategy = ?config.escalation_strategy,
        "gateway configured"
    );

    let http = reqwest::Client::builder()
        .timeout(config.outbound_timeout)
        .build()
        .expect("failed to build HTTP client");

    let listen_port = config.listen_port;
    let state = Arc::new(AppState { config, http });

    let addr = format!("0.0.0.0:{listen_port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");

    info!(address = %addr, "payrelay gateway listening");
    axum::serve(listener, app(state)).await.expect("server error");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{Value, json};

    use super::*;
    use crate::testutil::{spawn, test_config, test_state};

    fn server(state: Arc<AppState>) -> TestServer {
        TestServer::new(app(state)).expect("failed to build test server")
    }

    /// A router that counts every request it receives and fails it.
    fn counting_router(counter: Arc<AtomicUsize>) -> Router {
        Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })
    }

    /// Spawn a happy STS + IAM + destination trio; the destination records
    /// each received envelope and echoes the consulta id back.
    async fn happy_upstreams(seen: Arc<Mutex<Option<Value>>>) -> (String, String, String) {
        let sts = Router::new().route(
            "/v1/token",
            axum::routing::post(|| async {
                Json(json!({ "access_token": "fed-access", "token_type": "Bearer" }))
            }),
        );
        let iam = Router::new().route(
            "/v1/projects/-/serviceAccounts/{operation}",
            axum::routing::post(|| async { Json(json!({ "token": "identity-token" })) }),
        );
        let target = Router::new().route(
            "/preference",
            axum::routing::post(move |Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    let consulta = body["consultaId"].clone();
                    *seen.lock().unwrap() = Some(body);
                    Json(json!({
                        "ok": true,
                        "consultaId": consulta,
                        "preferenceId": "pref-1",
                        "init_point": "https://pay.example/init/1",
                        "sandbox_init_point": "https://sandbox.pay.example/init/1",
                    }))
                }
            }),
        );
        (spawn(sts).await, spawn(iam).await, spawn(target).await)
    }

    #[tokio::test]
    async fn healthz_reports_service_and_version() {
        let counter = Arc::new(AtomicUsize::new(0));
        let base = spawn(counting_router(counter)).await;
        let server = server(test_state(test_config(&base, &base, &base)));

        let res = server.get("/healthz").await;
        assert_eq!(res.status_code(), StatusCode::OK);
        let body: Value = res.json();
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], "payrelay-gateway");
    }

    #[tokio::test]
    async fn missing_name_is_400_and_makes_no_outbound_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn(counting_router(calls.clone())).await;
        let server = server(test_state(test_config(&base, &base, &base)));

        let res = server
            .post("/api/checkout")
            .json(&json!({ "name": "   ", "email": "ana@example.com" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = res.json();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "missing_name");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn email_without_at_sign_is_400() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn(counting_router(calls.clone())).await;
        let server = server(test_state(test_config(&base, &base, &base)));

        let res = server
            .post("/api/checkout")
            .json(&json!({ "name": "Ana", "email": "not-an-email" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = res.json();
        assert_eq!(body["error"], "missing_email");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unparseable_body_is_400_invalid_json() {
        let counter = Arc::new(AtomicUsize::new(0));
        let base = spawn(counting_router(counter.clone())).await;
        let server = server(test_state(test_config(&base, &base, &base)));

        let res = server
            .post("/api/checkout")
            .content_type("application/json")
            .text("{not json")
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = res.json();
        assert_eq!(body["error"], "invalid_json");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_amount_is_ignored_without_debug() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let (sts, iam, target) = happy_upstreams(seen.clone()).await;
        let server = server(test_state(test_config(&sts, &iam, &target)));

        let res = server
            .post("/api/checkout")
            .json(&json!({
                "name": "Ana",
                "email": "ana@example.com",
                "testAmount": 50,
            }))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);

        let envelope = seen.lock().unwrap().clone().unwrap();
        assert_eq!(envelope["amount"], 100_000);
    }

    #[tokio::test]
    async fn debug_without_matching_admin_key_is_403_and_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn(counting_router(calls.clone())).await;
        let server = server(test_state(test_config(&base, &base, &base)));

        let res = server
            .post("/api/checkout")
            .add_header("x-admin-key", "wrong")
            .json(&json!({ "name": "Dev", "email": "dev@example.com", "debug": true }))
            .await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        let body: Value = res.json();
        assert_eq!(body["error"], "debug_not_allowed");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn debug_with_key_but_unlisted_email_is_403() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn(counting_router(calls.clone())).await;
        let server = server(test_state(test_config(&base, &base, &base)));

        let res = server
            .post("/api/checkout")
            .add_header("x-admin-key", "sekrit")
            .json(&json!({ "name": "Ana", "email": "ana@example.com", "debug": true }))
            .await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        let body: Value = res.json();
        assert_eq!(body["error"], "debug_email_not_allowed");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gated_debug_request_may_override_the_amount() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let (sts, iam, target) = happy_upstreams(seen.clone()).await;
        let server = server(test_state(test_config(&sts, &iam, &target)));

        let res = server
            .post("/api/checkout")
            .add_header("x-admin-key", "sekrit")
            .json(&json!({
                "name": "Dev",
                "email": "dev@example.com",
                "debug": true,
                "testAmount": 50,
            }))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);

        let envelope = seen.lock().unwrap().clone().unwrap();
        assert_eq!(envelope["amount"], 50);
    }

    /// Collects formatted log lines for inspection.
    #[derive(Clone)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn jwt_shaped_assertion() -> String {
        use base64::Engine;
        let enc = |v: &Value| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(v.to_string());
        format!(
            "{}.{}.sig",
            enc(&json!({ "alg": "RS256" })),
            enc(&json!({
                "iss": "https://oidc.platform.example",
                "aud": "payrelay",
                "sub": "workload-1",
            }))
        )
    }

    #[tokio::test]
    async fn assertion_claims_are_logged_only_for_gated_debug_requests() {
        use tracing::instrument::WithSubscriber;

        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let (sts, iam, target) = happy_upstreams(seen).await;
        let mut cfg = test_config(&sts, &iam, &target);
        cfg.assertion = crate::config::AssertionSource::Inline(jwt_shaped_assertion());
        let state = test_state(cfg);

        let logs: Arc<Mutex<Vec<u8>>> = Arc::default();
        let sink = logs.clone();
        let dispatch = tracing::Dispatch::new(
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::DEBUG)
                .with_ansi(false)
                .with_writer(move || LogCapture(sink.clone()))
                .finish(),
        );

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_KEY_HEADER, "sekrit".parse().unwrap());
        let request = CheckoutRequest {
            name: "Dev".to_string(),
            email: "dev@example.com".to_string(),
            debug: true,
            test_amount: None,
        };
        checkout_pipeline(&state, &headers, Ok(Json(request)))
            .with_subscriber(dispatch.clone())
            .await
            .unwrap();
        let output = String::from_utf8(logs.lock().unwrap().clone()).unwrap();
        assert!(output.contains("subject assertion claims"));

        // Ordinary traffic keeps the claims out of the logs even with
        // diagnostics enabled.
        logs.lock().unwrap().clear();
        let request = CheckoutRequest {
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            debug: false,
            test_amount: None,
        };
        checkout_pipeline(&state, &HeaderMap::new(), Ok(Json(request)))
            .with_subscriber(dispatch)
            .await
            .unwrap();
        let output = String::from_utf8(logs.lock().unwrap().clone()).unwrap();
        assert!(!output.contains("subject assertion claims"));
    }

    #[tokio::test]
    async fn sts_rejection_stops_the_pipeline() {
        let sts = Router::new().route(
            "/v1/token",
            axum::routing::post(|| async {
                (StatusCode::FORBIDDEN, Json(json!({ "error": "invalid_grant" })))
            }),
        );
        let later_calls = Arc::new(AtomicUsize::new(0));
        let sts_base = spawn(sts).await;
        let later_base = spawn(counting_router(later_calls.clone())).await;
        let server = server(test_state(test_config(&sts_base, &later_base, &later_base)));

        let res = server
            .post("/api/checkout")
            .json(&json!({ "name": "Ana", "email": "ana@example.com" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = res.json();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "sts_exchange_failed");
        // Neither escalation nor the destination was ever attempted.
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn escalation_rejection_never_reaches_the_destination() {
        let sts = Router::new().route(
            "/v1/token",
            axum::routing::post(|| async { Json(json!({ "access_token": "fed-access" })) }),
        );
        let iam = Router::new().route(
            "/v1/projects/-/serviceAccounts/{operation}",
            axum::routing::post(|| async {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown principal" })))
            }),
        );
        let target_calls = Arc::new(AtomicUsize::new(0));
        let sts_base = spawn(sts).await;
        let iam_base = spawn(iam).await;
        let target_base = spawn(counting_router(target_calls.clone())).await;
        let server = server(test_state(test_config(&sts_base, &iam_base, &target_base)));

        let res = server
            .post("/api/checkout")
            .json(&json!({ "name": "Ana", "email": "ana@example.com" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = res.json();
        assert_eq!(body["error"], "generate_id_token_failed");
        assert_eq!(target_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn downstream_ok_false_is_cloud_run_error_with_raw_body() {
        let sts = Router::new().route(
            "/v1/token",
            axum::routing::post(|| async { Json(json!({ "access_token": "fed-access" })) }),
        );
        let iam = Router::new().route(
            "/v1/projects/-/serviceAccounts/{operation}",
            axum::routing::post(|| async { Json(json!({ "token": "identity-token" })) }),
        );
        let target = Router::new().route(
            "/preference",
            axum::routing::post(|| async { Json(json!({ "ok": false, "error": "mp_rejected" })) }),
        );
        let server = server(test_state(test_config(
            &spawn(sts).await,
            &spawn(iam).await,
            &spawn(target).await,
        )));

        let res = server
            .post("/api/checkout")
            .json(&json!({ "name": "Ana", "email": "ana@example.com" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = res.json();
        assert_eq!(body["error"], "cloud_run_error");
        // Diagnostics are on in the test config: the body comes back verbatim.
        assert_eq!(body["status"], 200);
        assert_eq!(body["raw"], r#"{"ok":false,"error":"mp_rejected"}"#);
    }

    #[tokio::test]
    async fn happy_path_passes_downstream_fields_through() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::default();
        let (sts, iam, target) = happy_upstreams(seen.clone()).await;
        let server = server(test_state(test_config(&sts, &iam, &target)));

        let res = server
            .post("/api/checkout")
            .json(&json!({ "name": " Ana ", "email": "Ana@Example.COM " }))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);
        let body: Value = res.json();
        assert_eq!(body["ok"], true);
        assert_eq!(body["preferenceId"], "pref-1");
        assert_eq!(body["init_point"], "https://pay.example/init/1");
        assert_eq!(body["sandbox_init_point"], "https://sandbox.pay.example/init/1");
        assert!(body["consultaId"].as_str().unwrap().starts_with("web_"));

        // Name and email were normalised before leaving the gateway.
        let envelope = seen.lock().unwrap().clone().unwrap();
        assert_eq!(envelope["name"], "Ana");
        assert_eq!(envelope["email"], "ana@example.com");
        assert_eq!(envelope["title"], "Consulta Jurídica");
    }

    #[tokio::test]
    async fn diagnostics_off_keeps_failure_envelopes_terse() {
        let sts = Router::new().route(
            "/v1/token",
            axum::routing::post(|| async {
                (StatusCode::FORBIDDEN, Json(json!({ "error": "invalid_grant" })))
            }),
        );
        let sts_base = spawn(sts).await;
        let mut config = test_config(&sts_base, &sts_base, &sts_base);
        config.diagnostics = false;
        let server = server(test_state(config));

        let res = server
            .post("/api/checkout")
            .json(&json!({ "name": "Ana", "email": "ana@example.com" }))
            .await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = res.json();
        assert_eq!(body["error"], "sts_exchange_failed");
        assert!(body.get("details").is_none());
        assert!(body.get("raw").is_none());
    }
}
