//! Common test utilities for `PushPop` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use pushpop_core::cache::DigestCache;
use pushpop_core::download::DownloadOptions;
use pushpop_core::server::ResumableServer;
use tokio::net::TcpListener;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1.len(), content2.len(), "File lengths differ");
    assert!(content1 == content2, "File contents differ");
}

/// Download options with short intervals so tests run quickly.
pub fn fast_options() -> DownloadOptions {
    DownloadOptions {
        chunk_size: 16 * 1024,
        progress_interval: Duration::from_millis(10),
        digest_retry_interval: Duration::from_millis(20),
        max_digest_retries: None,
    }
}

/// Serve `file` with the real sender endpoint on a loopback port.
///
/// Returns the base URL and the cache backing the digest route.
pub async fn spawn_sender(file: &Path) -> (String, DigestCache) {
    let cache = DigestCache::new();
    let server = ResumableServer::bind("127.0.0.1:0".parse().unwrap(), file, cache.clone())
        .await
        .expect("Failed to bind sender");
    let addr = server.local_addr();
    tokio::spawn(server.serve(std::future::pending()));
    (base_url(addr), cache)
}

/// Serve an arbitrary router on a loopback port and return its base URL.
pub async fn spawn_router(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test router");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    base_url(addr)
}

fn base_url(addr: SocketAddr) -> String {
    format!("http://{addr}/")
}
