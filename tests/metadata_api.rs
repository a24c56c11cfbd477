use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use evm_etl::indexer::api::MetadataApi;
use evm_etl::models::common::{MetadataApiConfig, RateLimitConfig};
use evm_etl::models::errors::ApiError;

struct Explorer {
    hits: AtomicUsize,
    rate_limited: usize,
}

async fn explorer(State(state): State<Arc<Explorer>>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    if hit < state.rate_limited {
        return Json(json!({ "status": "0", "message": "NOTOK", "result": "Max rate limit reached" }));
    }
    if params.get("apikey").map(String::as_str) != Some("secret") {
        return Json(json!({ "status": "0", "message": "NOTOK", "result": "Invalid API Key" }));
    }
    let name = match params.get("address").map(String::as_str) {
        Some("0xpool") => "UniswapV2Pair",
        _ => "",
    };
    Json(json!({ "status": "1", "message": "OK", "result": [{ "ContractName": name }] }))
}

async fn start(rate_limited: usize, max_attempts: u32, api_key: Option<&str>) -> (MetadataApi, Arc<Explorer>) {
    let unlimited = RateLimitConfig {
        max_calls: 1_000,
        period_ms: 1_000,
    };
    start_limited(rate_limited, max_attempts, api_key, unlimited).await
}

async fn start_limited(
    rate_limited: usize,
    max_attempts: u32,
    api_key: Option<&str>,
    rate_limit: RateLimitConfig,
) -> (MetadataApi, Arc<Explorer>) {
    let state = Arc::new(Explorer {
        hits: AtomicUsize::new(0),
        rate_limited,
    });
    let app = Router::new().route("/api", get(explorer)).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api = MetadataApi::new(&MetadataApiConfig {
        url: format!("http://{addr}/api"),
        api_key: api_key.map(str::to_string),
        max_attempts,
        backoff_ms: 10,
        rate_limit,
    })
    .unwrap();
    (api, state)
}

#[tokio::test]
async fn test_rate_limit_is_retried_and_result_cached() {
    let (api, explorer) = start(2, 5, Some("secret")).await;

    assert_eq!(api.contract_name("0xpool").await.unwrap().as_deref(), Some("UniswapV2Pair"));
    assert_eq!(explorer.hits.load(Ordering::SeqCst), 3);

    // Served from cache
    assert_eq!(api.contract_name("0xpool").await.unwrap().as_deref(), Some("UniswapV2Pair"));
    assert_eq!(explorer.hits.load(Ordering::SeqCst), 3);

    // Unverified contracts have no name
    assert_eq!(api.contract_name("0xother").await.unwrap(), None);
}

#[tokio::test]
async fn test_exhausted_retries_surface_typed_error() {
    let (api, explorer) = start(usize::MAX, 3, Some("secret")).await;

    let err = api.contract_name("0xpool").await.unwrap_err();
    assert!(matches!(err, ApiError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(explorer.hits.load(Ordering::SeqCst), 3);

    // Failures are not cached
    assert!(api.contract_name("0xpool").await.is_err());
    assert_eq!(explorer.hits.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_deterministic_errors_are_not_retried() {
    let (api, explorer) = start(0, 5, None).await;

    let err = api.contract_name("0xpool").await.unwrap_err();
    assert!(matches!(err, ApiError::Malformed(_)));
    assert_eq!(explorer.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_requests_are_paced_by_rate_limit() {
    let rate_limit = RateLimitConfig {
        max_calls: 2,
        period_ms: 400,
    };
    let (api, explorer) = start_limited(0, 3, Some("secret"), rate_limit).await;

    let started = Instant::now();
    let names = futures::future::join_all(["0xa", "0xb", "0xc"].map(|address| api.contract_name(address))).await;

    assert!(names.iter().all(Result::is_ok));
    assert_eq!(explorer.hits.load(Ordering::SeqCst), 3);
    // Grants land at 0ms, 200ms and 400ms
    assert!(started.elapsed() >= Duration::from_millis(400));
}
