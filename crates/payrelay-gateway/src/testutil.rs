//! Shared helpers for gateway tests: ephemeral mock upstreams and a
//! config pointing at them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use crate::AppState;
use crate::config::AppConfig;

/// Serve `router` on an ephemeral localhost port; returns the base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock listener");
    let addr = listener.local_addr().expect("mock listener has no addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server error");
    });
    format!("http://{addr}")
}

/// A full config with every upstream pointed at the given base URLs.
///
/// Diagnostics are on so tests can assert on raw failure detail, and
/// `dev@example.com` is the one allow-listed debug email.
pub fn test_config(sts_base: &str, iam_base: &str, target_base: &str) -> AppConfig {
    let pairs: HashMap<&str, String> = [
        ("GCP_PROJECT_NUMBER", "123456".to_string()),
        ("GCP_WIF_POOL_ID", "pool".to_string()),
        ("GCP_WIF_PROVIDER_ID", "provider".to_string()),
        (
            "GCP_SERVICE_ACCOUNT",
            "relay@proj.iam.gserviceaccount.com".to_string(),
        ),
        ("GCP_TARGET_URL", format!("{target_base}/preference")),
        ("ADMIN_KEY", "sekrit".to_string()),
        ("SUBJECT_TOKEN", "platform-assertion".to_string()),
        ("GCP_STS_URL", format!("{sts_base}/v1/token")),
        ("GCP_IAM_URL", iam_base.to_string()),
        ("DEBUG_EMAIL_ALLOWLIST", "dev@example.com".to_string()),
        ("PAYRELAY_DIAGNOSTICS", "1".to_string()),
    ]
    .into_iter()
    .collect();

    AppConfig::from_lookup(|key| pairs.get(key).cloned()).expect("test config is complete")
}

/// App state over `config` with a short-deadline HTTP client.
pub fn test_state(config: AppConfig) -> Arc<AppState> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build test HTTP client");
    Arc::new(AppState { config, http })
}
