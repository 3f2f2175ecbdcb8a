//! End-to-end tests for the upload protocol
//!
//! Tests uploads over TCP and what becomes visible over HTTP afterwards.

mod common;

use common::{TestClient, TestLibrarian, DIGITS_PAYLOAD, NUL_PAYLOAD, TEST_SOCKET_TIMEOUT_SECS};
use librarian::storage::DigestAlgorithm;
use librarian::{LibrarianError, Partition, UploadOptions};
use reqwest::StatusCode;
use std::time::Duration;

#[tokio::test]
async fn test_nul_payload_round_trips_byte_for_byte() {
    let server = TestLibrarian::spawn().await;
    let client = TestClient::new(&server.public);
    let digest = DigestAlgorithm::Sha256.digest_bytes(NUL_PAYLOAD);

    let reply = client
        .raw_upload(&TestClient::store_request(
            "nul.bin",
            NUL_PAYLOAD,
            &[("Content-Digest", &digest)],
        ))
        .await;
    let (_, alias_id) = TestClient::parse_ids(&reply);

    let response = client.get_file(alias_id, "nul.bin").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["etag"].to_str().unwrap(),
        format!("\"{}\"", digest)
    );
    assert_eq!(
        response.headers()["content-length"].to_str().unwrap(),
        NUL_PAYLOAD.len().to_string()
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), NUL_PAYLOAD);
}

#[tokio::test]
async fn test_library_client_upload_download_and_search() {
    let server = TestLibrarian::spawn().await;
    let client = server.client(Partition::Public);

    let uploaded = client
        .upload(
            "digits.txt",
            DIGITS_PAYLOAD,
            &UploadOptions {
                content_type: Some("text/plain".to_string()),
                send_digest: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let bytes = client.download(uploaded.alias_id, "digits.txt").await.unwrap();
    assert_eq!(bytes, DIGITS_PAYLOAD);

    let digest = DigestAlgorithm::Sha256.digest_bytes(DIGITS_PAYLOAD);
    let hits = client.search(&digest).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].alias_id, uploaded.alias_id);
    assert_eq!(hits[0].content_id, uploaded.content_id);
    assert_eq!(hits[0].mime_type, "text/plain");
}

#[tokio::test]
async fn test_digest_mismatch_is_reported_to_client() {
    let server = TestLibrarian::spawn().await;
    let client = TestClient::new(&server.public);
    let wrong = DigestAlgorithm::Sha256.digest_bytes(b"something else");

    let reply = client
        .raw_upload(&TestClient::store_request(
            "a.txt",
            DIGITS_PAYLOAD,
            &[("Content-Digest", &wrong)],
        ))
        .await;
    assert!(reply.starts_with("400 "), "{}", reply);

    let hits = server
        .client(Partition::Public)
        .search(&DigestAlgorithm::Sha256.digest_bytes(DIGITS_PAYLOAD))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_size_mismatch_is_rejected() {
    let server = TestLibrarian::spawn().await;
    let client = TestClient::new(&server.public);

    let reply = client.raw_upload(b"STORE 20 short.txt\r\n\r\n0123456789").await;
    assert!(reply.starts_with("400 "), "{}", reply);

    let reply = client.raw_upload(b"STORE 5 long.txt\r\n\r\n0123456789").await;
    assert!(reply.starts_with("400 "), "{}", reply);

    let stats = server
        .librarian
        .storage(Partition::Public)
        .catalog()
        .stats()
        .unwrap();
    assert_eq!(stats.content_count, 0);
}

#[tokio::test]
async fn test_interrupted_upload_leaves_nothing_behind() {
    let server = TestLibrarian::spawn().await;
    let client = TestClient::new(&server.public);

    client
        .abandoned_upload(b"STORE 10 partial.txt\r\n\r\n01234")
        .await;
    // Give the server time to notice
    tokio::time::sleep(Duration::from_secs(TEST_SOCKET_TIMEOUT_SECS + 1)).await;

    let storage = server.librarian.storage(Partition::Public);
    assert_eq!(storage.catalog().stats().unwrap().content_count, 0);
    let incoming: Vec<_> = std::fs::read_dir(storage.root().join("incoming"))
        .unwrap()
        .collect();
    assert!(incoming.is_empty(), "{:?}", incoming);

    // The server still accepts uploads afterwards
    let reply = client
        .raw_upload(&TestClient::store_request("whole.txt", DIGITS_PAYLOAD, &[]))
        .await;
    assert!(reply.starts_with("200 "), "{}", reply);
}

#[tokio::test]
async fn test_duplicate_uploads_get_distinct_aliases() {
    let server = TestLibrarian::spawn().await;
    let client = server.client(Partition::Public);
    let options = UploadOptions::default();

    let first = client.upload("one.txt", DIGITS_PAYLOAD, &options).await.unwrap();
    let second = client.upload("two.txt", DIGITS_PAYLOAD, &options).await.unwrap();
    assert_ne!(first.alias_id, second.alias_id);

    let hits = client
        .search(&DigestAlgorithm::Sha256.digest_bytes(DIGITS_PAYLOAD))
        .await
        .unwrap();
    let mut filenames: Vec<_> = hits.iter().map(|h| h.filename.as_str()).collect();
    filenames.sort();
    assert_eq!(filenames, vec!["one.txt", "two.txt"]);

    for uploaded in [first, second] {
        let bytes = client.download(uploaded.alias_id, "any").await.unwrap();
        assert_eq!(bytes, DIGITS_PAYLOAD);
    }
}

#[tokio::test]
async fn test_client_reports_protocol_errors() {
    let server = TestLibrarian::spawn().await;
    let client = server.client(Partition::Restricted);

    let result = client.upload("bad\nname.txt", DIGITS_PAYLOAD, &UploadOptions::default()).await;
    assert!(
        matches!(result, Err(LibrarianError::Protocol(_))),
        "{:?}",
        result
    );
}
