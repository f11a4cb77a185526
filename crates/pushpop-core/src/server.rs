//! HTTP endpoint for the sender.
//!
//! Serves one file with byte-range support and its digest:
//!
//! - `GET /` and `GET /<name>`: the file. `Range: bytes=N-` yields
//!   `206 Partial Content`, no Range yields `200 OK`.
//! - `GET /<name>.digest`: `200` with the hex digest, `503` with an empty
//!   body while hashing runs, `500` if hashing failed.
//!
//! Everything else is `404`. Each request is logged with the claimed user
//! and the requester address.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Path as UrlPath, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::cache::{DigestCache, DigestStatus};
use crate::error::{Error, Result};
use crate::USER_HEADER;

/// Suffix of the digest route.
pub const DIGEST_SUFFIX: &str = ".digest";

/// State shared by all request handlers.
#[derive(Debug, Clone)]
struct ServerState {
    file_path: PathBuf,
    file_name: String,
    cache: DigestCache,
}

/// Build the router for sharing `file_path`.
pub fn router(file_path: &Path, cache: DigestCache) -> Result<Router> {
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath(format!("'{}' has no file name", file_path.display())))?
        .to_string();

    let state = Arc::new(ServerState {
        file_path: file_path.to_path_buf(),
        file_name,
        cache,
    });

    Ok(Router::new()
        .route("/", get(serve_root))
        .route("/{*path}", get(serve_path))
        .with_state(state))
}

async fn serve_root(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    serve_file(&state, req).await
}

async fn serve_path(
    State(state): State<Arc<ServerState>>,
    UrlPath(path): UrlPath<String>,
    req: Request,
) -> Response {
    if path == state.file_name {
        return serve_file(&state, req).await;
    }

    if path.strip_suffix(DIGEST_SUFFIX) == Some(state.file_name.as_str()) {
        let (user, addr) = requester(&req);
        tracing::info!(user = %user, addr = %addr, "Digest requested");
        return serve_digest(&state);
    }

    StatusCode::NOT_FOUND.into_response()
}

async fn serve_file(state: &ServerState, req: Request) -> Response {
    let (user, addr) = requester(&req);
    let range = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string();
    tracing::info!(user = %user, addr = %addr, range = %range, "File requested");

    match ServeFile::new(&state.file_path).oneshot(req).await {
        Ok(res) => res.map(Body::new),
        Err(never) => match never {},
    }
}

fn serve_digest(state: &ServerState) -> Response {
    match state.cache.request(&state.file_path) {
        DigestStatus::Pending => {
            (StatusCode::SERVICE_UNAVAILABLE, [(header::RETRY_AFTER, "1")]).into_response()
        }
        DigestStatus::Ready(Ok(digest)) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            digest.to_string(),
        )
            .into_response(),
        DigestStatus::Ready(Err(e)) => {
            tracing::error!(error = %e, "Serving digest failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Claimed user and best-known address of whoever sent `req`.
fn requester(req: &Request) -> (String, String) {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    (claimed_user(req.headers()), requester_addr(req.headers(), peer))
}

fn claimed_user(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("(unknown)")
        .to_string()
}

fn requester_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(addr), _) => addr.to_string(),
        (None, Some(peer)) => peer.ip().to_string(),
        (None, None) => "(unknown)".to_string(),
    }
}

/// A bound sender endpoint, ready to serve.
#[derive(Debug)]
pub struct ResumableServer {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
}

impl ResumableServer {
    /// Bind `addr` for sharing `file_path`. Port `0` picks a free port.
    pub async fn bind(addr: SocketAddr, file_path: &Path, cache: DigestCache) -> Result<Self> {
        let router = router(file_path, cache)?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, file = %file_path.display(), "Server listening");

        Ok(Self {
            listener,
            router,
            local_addr,
        })
    }

    /// The address actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    async fn fetch(router: Router, uri: &str, range: Option<&str>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        let res = router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    fn shared_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"0123456789abcdef").unwrap();
        path
    }

    #[tokio::test]
    async fn test_full_and_ranged_file() {
        let dir = TempDir::new().unwrap();
        let path = shared_file(&dir);
        let app = router(&path, DigestCache::new()).unwrap();

        let (status, _, body) = fetch(app.clone(), "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"0123456789abcdef");

        let (status, headers, body) = fetch(app.clone(), "/notes.txt", Some("bytes=10-")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(body, b"abcdef");
        assert_eq!(headers[header::CONTENT_LENGTH], "6");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = shared_file(&dir);
        let app = router(&path, DigestCache::new()).unwrap();

        let (status, _, _) = fetch(app.clone(), "/other.txt", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = fetch(app, "/other.txt.digest", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_digest_pending_then_ready() {
        let dir = TempDir::new().unwrap();
        let path = shared_file(&dir);
        let cache = DigestCache::new();
        let app = router(&path, cache.clone()).unwrap();

        let (status, _, body) = fetch(app.clone(), "/notes.txt.digest", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.is_empty());

        let waiter = cache.clone();
        let waited = path.clone();
        let digest = tokio::task::spawn_blocking(move || waiter.blocking_get(&waited))
            .await
            .unwrap()
            .unwrap();

        let (status, _, body) = fetch(app, "/notes.txt.digest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), digest.as_str());
        assert_eq!(cache.passes(), 1);
    }

    #[tokio::test]
    async fn test_digest_error_is_server_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.bin");
        let cache = DigestCache::new();
        let app = router(&path, cache.clone()).unwrap();

        assert!(cache.blocking_get(&path).is_err());
        let (status, _, _) = fetch(app, "/gone.bin.digest", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_requester_identity() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "192.168.1.20:5000".parse().unwrap();

        assert_eq!(claimed_user(&headers), "(unknown)");
        assert_eq!(requester_addr(&headers, Some(peer)), "192.168.1.20");
        assert_eq!(requester_addr(&headers, None), "(unknown)");

        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.7, 10.0.0.1"));
        assert_eq!(claimed_user(&headers), "alice");
        assert_eq!(requester_addr(&headers, Some(peer)), "10.0.0.7");
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let dir = TempDir::new().unwrap();
        let path = shared_file(&dir);
        let server = ResumableServer::bind("127.0.0.1:0".parse().unwrap(), &path, DigestCache::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
