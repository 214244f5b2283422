//! HTTP surface for entropyd.
//!
//! Serves the TRNG and Fortuna queues over JSON. Every endpoint answers with
//! the `{status, data?, error?}` envelope; consume semantics live entirely in
//! the core store, this layer only validates parameters and shapes responses.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use entropyd_core::{Error, Fortuna, Store, TrngProducer};

const LIMIT_DEFAULT: i64 = 10;
const LIMIT_MAX: i64 = 1000;

/// Shared server state.
pub struct AppState {
    pub store: Arc<Store>,
    pub producer: Arc<TrngProducer>,
    pub fortuna: Arc<Mutex<Fortuna>>,
    started: Instant,
}

impl AppState {
    pub fn new(store: Arc<Store>, producer: Arc<TrngProducer>, fortuna: Arc<Mutex<Fortuna>>) -> Self {
        Self {
            store,
            producer,
            fortuna,
            started: Instant::now(),
        }
    }
}

/// Response envelope shared by every endpoint.
#[derive(Serialize)]
struct Envelope {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Envelope {
    fn ok<T: Serialize>(data: T) -> Json<Self> {
        Json(Self {
            status: "ok",
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        })
    }

    fn err(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "error",
            data: None,
            error: Some(message.into()),
        })
    }
}

fn error_response(err: Error) -> (StatusCode, Json<Envelope>) {
    let status = match err {
        Error::Overflow(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Envelope::err(err.to_string()))
}

#[derive(Deserialize)]
struct FetchParams {
    limit: Option<i64>,
    offset: Option<i64>,
    consume: Option<bool>,
}

impl FetchParams {
    /// Bounds-check into (limit, offset, consume). Limit is 1-1000
    /// (default 10), offset is non-negative.
    fn validate(&self) -> Result<(usize, usize, bool), Error> {
        let limit = self.limit.unwrap_or(LIMIT_DEFAULT);
        if !(1..=LIMIT_MAX).contains(&limit) {
            return Err(Error::Overflow(format!(
                "limit must be 1-{LIMIT_MAX}, got {limit}"
            )));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(Error::Overflow(format!(
                "offset must be non-negative, got {offset}"
            )));
        }
        Ok((limit as usize, offset as usize, self.consume.unwrap_or(false)))
    }
}

#[derive(Serialize)]
struct HealthData {
    status: &'static str,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    reseed_count: u64,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct TrngEntry {
    id: i64,
    hash: String,
    source: entropyd_core::Source,
    timestamp_us: i64,
    consumed: bool,
    chunk_size: u32,
}

#[derive(Serialize)]
struct FortunaEntry {
    id: i64,
    data: String,
    timestamp_us: i64,
    consumed: bool,
    chunk_size: u32,
    amplification_factor: u32,
}

async fn handle_health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Envelope>) {
    let store_ok = state.store.health_check();
    let producer_ok = state.producer.health_check();
    let snapshot = state.fortuna.lock().unwrap().snapshot();
    let data = HealthData {
        status: if store_ok && producer_ok {
            "healthy"
        } else {
            "degraded"
        },
        mode: state.producer.mode().as_str(),
        last_error: state.producer.last_error(),
        reseed_count: snapshot.reseed_count,
        uptime_secs: state.started.elapsed().as_secs(),
    };
    if store_ok && producer_ok {
        (StatusCode::OK, Envelope::ok(data))
    } else {
        let body = Envelope {
            status: "error",
            data: serde_json::to_value(data).ok(),
            error: Some("queue or pool unreachable".into()),
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

async fn handle_trng_hashes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FetchParams>,
) -> (StatusCode, Json<Envelope>) {
    let (limit, offset, consume) = match params.validate() {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };
    match state.store.fetch_trng(limit, offset, consume) {
        Ok(records) => {
            let hashes: Vec<TrngEntry> = records
                .into_iter()
                .map(|r| TrngEntry {
                    id: r.id,
                    hash: r.hash_hex,
                    source: r.source,
                    timestamp_us: r.timestamp_us,
                    consumed: r.consumed,
                    chunk_size: r.chunk_size,
                })
                .collect();
            let count = hashes.len();
            (
                StatusCode::OK,
                Envelope::ok(serde_json::json!({ "hashes": hashes, "count": count })),
            )
        }
        Err(e) => error_response(e),
    }
}

async fn handle_fortuna_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FetchParams>,
) -> (StatusCode, Json<Envelope>) {
    let (limit, offset, consume) = match params.validate() {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };
    match state.store.fetch_fortuna(limit, offset, consume) {
        Ok(records) => {
            let chunks: Vec<FortunaEntry> = records
                .into_iter()
                .map(|r| FortunaEntry {
                    id: r.id,
                    data: hex::encode(&r.data),
                    timestamp_us: r.timestamp_us,
                    consumed: r.consumed,
                    chunk_size: r.chunk_size,
                    amplification_factor: r.amplification_factor,
                })
                .collect();
            let count = chunks.len();
            (
                StatusCode::OK,
                Envelope::ok(serde_json::json!({ "chunks": chunks, "count": count })),
            )
        }
        Err(e) => error_response(e),
    }
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Envelope>) {
    match state.store.stats() {
        Ok(stats) => {
            let snapshot = state.fortuna.lock().unwrap().snapshot();
            let mut data = serde_json::to_value(stats).unwrap_or(serde_json::Value::Null);
            if let serde_json::Value::Object(map) = &mut data {
                map.insert("reseed_count".into(), snapshot.reseed_count.into());
                map.insert("last_reseed_us".into(), snapshot.last_reseed_us.into());
            }
            (StatusCode::OK, Envelope::ok(data))
        }
        Err(e) => error_response(e),
    }
}

async fn handle_source_stats(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Envelope>) {
    match state.store.source_stats() {
        Ok(days) => {
            let count = days.len();
            (
                StatusCode::OK,
                Envelope::ok(serde_json::json!({ "days": days, "count": count })),
            )
        }
        Err(e) => error_response(e),
    }
}

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/trng/hashes", get(handle_trng_hashes))
        .route("/fortuna/data", get(handle_fortuna_data))
        .route("/stats", get(handle_stats))
        .route("/stats/sources", get(handle_source_stats))
        .with_state(state)
}

/// Run the HTTP server until ctrl-c.
pub async fn run_server(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
