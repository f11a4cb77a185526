//! Digest endpoint behaviour under concurrent requests.

mod common;

use std::time::Duration;

use common::{create_temp_dir, create_test_file, random_bytes, spawn_sender};
use futures::future::join_all;
use pushpop_core::hasher::hash_file;
use pushpop_core::USER_HEADER;
use reqwest::StatusCode;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_digest_requests_hash_once() {
    let dir = create_temp_dir();
    let source = create_test_file(dir.path(), "big.bin", &random_bytes(8 * 1024 * 1024));
    let (base_url, cache) = spawn_sender(&source).await;
    let url = format!("{base_url}big.bin.digest");
    let client = reqwest::Client::new();

    let replies = join_all((0..16).map(|i| {
        client
            .get(&url)
            .header(USER_HEADER, format!("peer{i}"))
            .send()
    }))
    .await;
    for reply in replies {
        let status = reply.unwrap().status();
        assert!(
            status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE,
            "unexpected status {status}"
        );
    }

    let digest = loop {
        let reply = client.get(&url).send().await.unwrap();
        if reply.status() == StatusCode::OK {
            break reply.text().await.unwrap();
        }
        assert_eq!(reply.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(reply.text().await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(digest, hash_file(&source).unwrap().as_str());
    assert_eq!(cache.passes(), 1);
}

#[tokio::test]
async fn test_range_requests_against_sender() {
    let dir = create_temp_dir();
    let content = random_bytes(10_000);
    let source = create_test_file(dir.path(), "small.bin", &content);
    let (base_url, _cache) = spawn_sender(&source).await;
    let client = reqwest::Client::new();

    let full = client.get(&base_url).send().await.unwrap();
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(full.bytes().await.unwrap().as_ref(), content.as_slice());

    let tail = client
        .get(format!("{base_url}small.bin"))
        .header(reqwest::header::RANGE, "bytes=9000-")
        .send()
        .await
        .unwrap();
    assert_eq!(tail.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(tail.content_length(), Some(1000));
    assert_eq!(tail.bytes().await.unwrap().as_ref(), &content[9000..]);

    let missing = client
        .get(format!("{base_url}elsewhere.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
