//! HTTP front end.
//!
//! `POST /update/` takes the client's flat checksum map and answers with a zip
//! of patches, full files and delete markers, or 204 when nothing changed.
//! `GET /patch/:hash` streams a precomputed bundle verbatim.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::archive::{self, is_empty_archive, Compression};
use crate::catalog::CatalogHandle;
use crate::delta::ClientReport;
use crate::error::ReportError;
use crate::ident::Checksum;
use crate::storage::FsStore;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub listen: SocketAddr,
    pub max_request_bytes: usize,
    pub request_timeout: Duration,
    pub compression: Compression,
}

#[derive(Debug, Clone)]
pub struct AppState {
    catalog: Arc<CatalogHandle>,
    store: Arc<FsStore>,
    compression: Compression,
}

impl AppState {
    pub fn new(catalog: Arc<CatalogHandle>, store: FsStore, compression: Compression) -> Self {
        Self {
            catalog,
            store: Arc::new(store),
            compression,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ReportError> for ServeError {
    fn from(e: ReportError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            Self::Internal(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server issue.").into_response()
            }
        }
    }
}

pub fn router(state: AppState, max_request_bytes: usize, request_timeout: Duration) -> Router {
    Router::new()
        .route("/update", post(post_update))
        .route("/update/", post(post_update))
        .route("/patch/:hash", get(get_patch))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn post_update(
    State(state): State<AppState>,
    Json(payload): Json<BTreeMap<String, String>>,
) -> Result<Response, ServeError> {
    let report = ClientReport::from_wire(payload)?;
    let catalog = state.catalog.snapshot();
    let store = Arc::clone(&state.store);
    let compression = state.compression;

    // The temp file has no name on disk and goes away with the last handle,
    // including when the client disconnects mid-transfer.
    let (file, len) = tokio::task::spawn_blocking(move || -> Result<(std::fs::File, u64)> {
        let out = tempfile::tempfile().context("Failed to create archive temp file")?;
        let (mut out, _) = archive::build_update(&catalog, &report, store.as_ref(), out, compression)
            .context("Failed to assemble update archive")?;
        let len = out.metadata().context("Failed to stat archive")?.len();
        out.seek(SeekFrom::Start(0)).context("Failed to rewind archive")?;
        Ok((out, len))
    })
    .await
    .context("Archive task panicked")??;

    if is_empty_archive(len) {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(file)));
    Ok((
        [
            (CONTENT_TYPE, "application/zip"),
            (CONTENT_DISPOSITION, "attachment; filename=\"update.zip\""),
        ],
        body,
    )
        .into_response())
}

async fn get_patch(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ServeError> {
    let hash = Checksum::new(hash).map_err(|_| ServeError::BadRequest("Not a valid sha256 hash!".into()))?;
    let file = state.store.open_bundle(&hash).await.map_err(|e| {
        warn!(error = %e, "bundle not found");
        ServeError::NotFound(format!("no bundle for {hash}"))
    })?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream"),
            (CONTENT_DISPOSITION, "attachment; filename=\"latest.patch\""),
        ],
        body,
    )
        .into_response())
}

/// Serve until ctrl-c, or until a catalog reload fails.
///
/// A failed reload shuts the server down and is returned as an error: the
/// previous catalog is never kept serving once the on-disk state is known to
/// be broken.
pub async fn serve(config: ServerConfig, catalog: Arc<CatalogHandle>) -> Result<()> {
    let state = AppState::new(
        Arc::clone(&catalog),
        FsStore::new(&config.root),
        config.compression,
    );
    let app = router(state, config.max_request_bytes, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(addr = %listener.local_addr()?, root = %config.root.display(), "listening");

    let token = CancellationToken::new();
    let reloader = tokio::spawn(reload_on_hangup(catalog, config.root.clone(), token.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await
        .context("Server error")?;

    token.cancel();
    reloader.await.context("Reload task panicked")?
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn reload_on_hangup(
    catalog: Arc<CatalogHandle>,
    root: PathBuf,
    token: CancellationToken,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            Some(()) = hangup.recv() => {
                info!("SIGHUP received, reloading catalog");
                let catalog = Arc::clone(&catalog);
                let root = root.clone();
                let reloaded = tokio::task::spawn_blocking(move || catalog.reload(&root))
                    .await
                    .context("Reload task panicked")?;
                if let Err(e) = reloaded {
                    error!(error = %e, "catalog reload failed, refusing further traffic");
                    token.cancel();
                    return Err(e).context("Catalog reload failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _catalog: Arc<CatalogHandle>,
    _root: PathBuf,
    token: CancellationToken,
) -> Result<()> {
    token.cancelled().await;
    Ok(())
}
