//! HTTP API for logo nearest-neighbor queries and registration.
//!
//! API endpoints:
//! - GET  /ann                - neighbors of a randomly sampled indexed logo
//! - GET  /ann/count          - stored vs indexed record counts
//! - GET  /ann/stored         - page through stored logos
//! - GET  /ann/{logo_id}      - neighbors of a stored logo
//! - POST /ann/batch          - neighbors for several logos at once
//! - POST /ann/from_embedding - neighbors of a raw vector
//! - POST /ann/add            - register a logo embedding
//! - POST /ann/generate_index - rebuild the snapshot from the store

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use logosearch_index::{
    AddRequest, Neighbor, RegenError, RegenerationJob, ResolveError, Resolver,
};
use logosearch_vecstore::{BuildParams, Metric};

const DEFAULT_COUNT: usize = 100;
const MAX_COUNT: usize = 500;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub job: Arc<RegenerationJob>,
    pub metric: Metric,
    pub params: BuildParams,
}

/// Error payload returned to clients as `{"error": ..., "message": ...}`.
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self {
            status,
            code,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        let message = e.to_string();
        match e {
            ResolveError::Validation(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "validation", message)
            }
            ResolveError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "not_found", message),
            ResolveError::NotIndexed(_) => {
                ApiError::new(StatusCode::CONFLICT, "not_indexed", message)
            }
            ResolveError::NoActiveIndex => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "no_active_index", message)
            }
            ResolveError::Store(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "store", message)
            }
            ResolveError::Index(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "search", message)
            }
            ResolveError::Model(_) => ApiError::new(StatusCode::BAD_GATEWAY, "model", message),
        }
    }
}

impl From<RegenError> for ApiError {
    fn from(e: RegenError) -> Self {
        let message = e.to_string();
        match e {
            RegenError::Busy => ApiError::new(StatusCode::CONFLICT, "busy", message),
            RegenError::EmptyStore(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "empty_store", message)
            }
            RegenError::Cancelled => ApiError::new(StatusCode::CONFLICT, "cancelled", message),
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "rebuild", message),
        }
    }
}

/// Query knobs shared by the search endpoints.
#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    count: Option<usize>,
    precision: Option<usize>,
}

impl SearchParams {
    /// Clamp the requested result count to [1, 500], defaulting to 100.
    fn count(&self) -> usize {
        self.count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT)
    }

    fn precision(&self) -> usize {
        self.precision.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    logo_ids: Vec<u64>,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    precision: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FromEmbeddingRequest {
    #[serde(alias = "embedding")]
    vector: Vec<f32>,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    precision: Option<usize>,
}

#[derive(Debug, Serialize)]
struct NeighborList {
    logo_id: u64,
    neighbors: Vec<Neighbor>,
}

/// One entry of a batch response; failures are reported per id.
#[derive(Debug, Serialize)]
struct BatchEntry {
    logo_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    neighbors: Option<Vec<Neighbor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoredParams {
    #[serde(default)]
    page_token: Option<u64>,
    #[serde(default)]
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StoredEntry {
    logo_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_id: Option<String>,
    added_at: i64,
}

#[derive(Debug, Serialize)]
struct StoredResponse {
    entries: Vec<StoredEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ann", get(random_logo))
        .route("/ann/count", get(counts))
        .route("/ann/stored", get(stored))
        .route("/ann/batch", post(batch))
        .route("/ann/from_embedding", post(from_embedding))
        .route("/ann/add", post(add))
        .route("/ann/generate_index", post(generate_index))
        .route("/ann/{logo_id}", get(by_logo_id))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server; runs until shutdown is requested.
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let addr = parse_addr(addr)?;
    let app = router(state);

    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

/// Parse address string to SocketAddr; ":8080" binds all interfaces.
fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    Ok(addr.parse()?)
}

async fn counts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let counts = state.resolver.counts()?;
    Ok(Json(counts))
}

async fn stored(
    State(state): State<AppState>,
    Query(params): Query<StoredParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.resolver.stored(params.page_token, params.page_size)?;
    let entries = page
        .entries
        .into_iter()
        .map(|(logo_id, meta)| StoredEntry {
            logo_id,
            image_id: meta.image_id,
            added_at: meta.added_at,
        })
        .collect();
    Ok(Json(StoredResponse {
        entries,
        next_page_token: page.next_page_token,
    }))
}

async fn random_logo(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (logo_id, neighbors) = state
        .resolver
        .resolve_random(params.count(), params.precision())?;
    Ok(Json(NeighborList { logo_id, neighbors }))
}

async fn by_logo_id(
    State(state): State<AppState>,
    Path(logo_id): Path<u64>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let neighbors = state
        .resolver
        .resolve(logo_id, params.count(), params.precision())?;
    Ok(Json(NeighborList { logo_id, neighbors }))
}

async fn batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let params = SearchParams {
        count: req.count,
        precision: req.precision,
    };
    let results = state
        .resolver
        .resolve_batch(&req.logo_ids, params.count(), params.precision());
    let entries: Vec<BatchEntry> = results
        .into_iter()
        .map(|(logo_id, outcome)| match outcome {
            Ok(neighbors) => BatchEntry {
                logo_id,
                neighbors: Some(neighbors),
                error: None,
                message: None,
            },
            Err(e) => {
                let api: ApiError = e.into();
                BatchEntry {
                    logo_id,
                    neighbors: None,
                    error: Some(api.code),
                    message: Some(api.message),
                }
            }
        })
        .collect();
    Ok(Json(entries))
}

async fn from_embedding(
    State(state): State<AppState>,
    Json(req): Json<FromEmbeddingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let params = SearchParams {
        count: req.count,
        precision: req.precision,
    };
    let neighbors = state
        .resolver
        .resolve_vector(&req.vector, params.count(), params.precision())?;
    Ok(Json(serde_json::json!({ "neighbors": neighbors })))
}

async fn add(
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let logo_id = req.logo_id;
    state.resolver.add(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "logo_id": logo_id })),
    ))
}

async fn generate_index(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let job = state.job.clone();
    let model_version = state.resolver.model_version().to_string();
    let metric = state.metric;
    let params = state.params;

    // The build is CPU bound; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || job.run(&model_version, metric, params))
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "rebuild",
                e.to_string(),
            )
        })?;
    let meta = result?;
    Ok(Json(meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_clamped() {
        let p = SearchParams {
            count: None,
            precision: None,
        };
        assert_eq!(p.count(), 100);

        let p = SearchParams {
            count: Some(0),
            precision: None,
        };
        assert_eq!(p.count(), 1);

        let p = SearchParams {
            count: Some(10_000),
            precision: None,
        };
        assert_eq!(p.count(), 500);

        let p = SearchParams {
            count: Some(25),
            precision: Some(80),
        };
        assert_eq!(p.count(), 25);
        assert_eq!(p.precision(), 80);
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(
            parse_addr(":8080").unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_addr("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_addr("nonsense").is_err());
    }

    #[test]
    fn test_batch_entry_shape() {
        let ok = BatchEntry {
            logo_id: 1,
            neighbors: Some(vec![]),
            error: None,
            message: None,
        };
        let v = serde_json::to_value(&ok).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("neighbors").is_some());

        let err = BatchEntry {
            logo_id: 2,
            neighbors: None,
            error: Some("not_found"),
            message: Some("resolve: logo 2 is unknown".to_string()),
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["error"], "not_found");
        assert!(v.get("neighbors").is_none());
    }
}
