//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest/` | Upload files (multipart, repeated `files` field) |
//! | `GET`  | `/query/?query_text=…&n_results=…` | Nearest documents to a query |
//! | `GET`  | `/database/` | Every stored document |
//! | `GET`  | `/database/{id}` | One stored document |
//! | `GET`  | `/health` | Status, version, document count and model |
//!
//! Every path is also served without its trailing slash.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Cannot decode 'notes.bin'." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `payload_too_large` (413), `embedding_error` (500), `database_error` (500),
//! `internal_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::QueryRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::ingest::{ingest_files, IngestError, IngestedDocument};
use crate::models::{QueryMatch, StoredDocument, UploadedFile};
use crate::search::{query_documents, SearchError};
use crate::store::DocumentStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: DocumentStore,
    pub embedder: Arc<dyn Embedder>,
}

/// Open the store, load the configured embedding model and serve until
/// Ctrl-C.
///
/// Fails before binding if the model cannot be loaded.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedding_config = config.embedding.clone();
    let embedder =
        tokio::task::spawn_blocking(move || create_embedder(&embedding_config)).await??;
    run_server_with_embedder(config, embedder).await
}

/// Like [`run_server`], with a caller-supplied embedder.
pub async fn run_server_with_embedder(
    config: &Config,
    embedder: Arc<dyn Embedder>,
) -> anyhow::Result<()> {
    let store = DocumentStore::open(&config.db).await?;
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        store: store.clone(),
        embedder,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %bind_addr,
        collection = store.collection(),
        "docsearch listening on http://{}",
        bind_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    info!("server stopped");
    Ok(())
}

/// Build the application router over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/ingest/", post(handle_ingest))
        .route("/ingest", post(handle_ingest))
        .route("/query/", get(handle_query))
        .route("/query", get(handle_query))
        .route("/database/", get(handle_list))
        .route("/database", get(handle_list))
        .route("/database/{id}", get(handle_get))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), code = self.code, message = %self.message, "request failed");
        } else if self.status.is_client_error() {
            warn!(status = self.status.as_u16(), code = self.code, message = %self.message, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn embedding_error(err: anyhow::Error) -> AppError {
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "embedding_error",
        format!("{:#}", err),
    )
}

fn database_error(err: anyhow::Error) -> AppError {
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "database_error",
        format!("{:#}", err),
    )
}

fn internal_error(err: impl std::fmt::Display) -> AppError {
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        err.to_string(),
    )
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NoFiles | IngestError::Decode { .. } | IngestError::Extract { .. } => {
                bad_request(err.to_string())
            }
            IngestError::Embedding(e) => embedding_error(e),
            IngestError::Storage(e) => database_error(e),
            IngestError::Task(e) => internal_error(e),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::EmptyQuery | SearchError::InvalidLimit { .. } => {
                bad_request(err.to_string())
            }
            SearchError::Embedding(e) => embedding_error(e),
            SearchError::Storage(e) => database_error(e),
        }
    }
}

// ============ POST /ingest/ ============

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    documents: Vec<IngestedDocument>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        if field.name() != Some("files") {
            continue;
        }

        let filename = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or("unknown")
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        files.push(UploadedFile {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let report = ingest_files(&state.store, state.embedder.as_ref(), &state.config, files).await?;

    Ok(Json(IngestResponse {
        status: "Documents uploaded successfully",
        documents: report.documents,
    }))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(status, "payload_too_large", err.body_text())
    } else {
        bad_request(format!("invalid multipart body: {}", err.body_text()))
    }
}

// ============ GET /query/ ============

#[derive(Deserialize)]
struct QueryParams {
    query_text: Option<String>,
    n_results: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<QueryMatch>,
}

async fn handle_query(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let query_text = params
        .query_text
        .ok_or_else(|| bad_request("query_text is required"))?;

    let results = query_documents(
        &state.store,
        state.embedder.as_ref(),
        &state.config.retrieval,
        &query_text,
        params.n_results,
    )
    .await?;

    Ok(Json(QueryResponse { results }))
}

// ============ GET /database/ ============

#[derive(Serialize)]
struct DatabaseResponse {
    documents: Vec<StoredDocument>,
}

async fn handle_list(State(state): State<AppState>) -> Result<Json<DatabaseResponse>, AppError> {
    let documents = state.store.list_documents().await.map_err(database_error)?;
    Ok(Json(DatabaseResponse { documents }))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredDocument>, AppError> {
    state
        .store
        .get_document(&id)
        .await
        .map_err(database_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: i64,
    model: String,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let documents = state.store.count_documents().await.map_err(database_error)?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        documents,
        model: state.embedder.model_name().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logs::capture_logs;
    use tracing::Level;

    #[test]
    fn test_client_errors_logged_at_warn() {
        let logs = capture_logs(Level::WARN, || {
            let response = bad_request("query_text is required").into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        });
        assert!(logs.contains("WARN"), "logs: {}", logs);
        assert!(logs.contains("request rejected"), "logs: {}", logs);
        assert!(logs.contains("query_text is required"), "logs: {}", logs);
    }

    #[test]
    fn test_server_errors_logged_at_error() {
        let logs = capture_logs(Level::WARN, || {
            let response = database_error(anyhow::anyhow!("disk full")).into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        });
        assert!(logs.contains("ERROR"), "logs: {}", logs);
        assert!(logs.contains("disk full"), "logs: {}", logs);
    }

    #[tokio::test]
    async fn test_failed_extraction_task_maps_to_internal_error() {
        let join_err = tokio::task::spawn_blocking(|| -> usize { panic!("extractor crashed") })
            .await
            .unwrap_err();

        let err = AppError::from(IngestError::Task(join_err));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal_error");
    }

    #[test]
    fn test_ingest_input_errors_map_to_bad_request() {
        let err = AppError::from(IngestError::Decode {
            filename: "bad.bin".to_string(),
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Cannot decode 'bad.bin'.");
    }
}
