//! Raw client for end-to-end tests
//!
//! Speaks the upload protocol byte by byte and issues plain HTTP requests,
//! so tests can exercise malformed and partial input.

use super::constants::*;
use super::server::Endpoints;
use reqwest::Response;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub endpoints: Endpoints,
}

impl TestClient {
    pub fn new(endpoints: &Endpoints) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            endpoints: endpoints.clone(),
        }
    }

    // ========================================================================
    // Upload Protocol
    // ========================================================================

    /// Sends `request`, half-closes, and returns whatever the server replied.
    pub async fn raw_upload(&self, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(&self.endpoints.upload_addr)
            .await
            .expect("Failed to connect to upload server");
        stream.write_all(request).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        tokio::time::timeout(
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            stream.read_to_string(&mut reply),
        )
        .await
        .expect("Upload server did not answer")
        .unwrap();
        reply
    }

    /// Sends part of an upload and drops the connection.
    pub async fn abandoned_upload(&self, request: &[u8]) {
        let mut stream = TcpStream::connect(&self.endpoints.upload_addr)
            .await
            .expect("Failed to connect to upload server");
        stream.write_all(request).await.unwrap();
        drop(stream);
    }

    /// Builds a well-formed upload request for `data`.
    pub fn store_request(filename: &str, data: &[u8], headers: &[(&str, &str)]) -> Vec<u8> {
        let mut request = format!("STORE {} {}\r\n", data.len(), filename);
        for (name, value) in headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        let mut request = request.into_bytes();
        request.extend_from_slice(data);
        request
    }

    /// Parses a `200 content/alias` reply.
    pub fn parse_ids(reply: &str) -> (i64, i64) {
        let ids = reply
            .trim_end()
            .strip_prefix("200 ")
            .unwrap_or_else(|| panic!("Upload failed: {:?}", reply));
        let (content, alias) = ids.split_once('/').unwrap();
        (content.parse().unwrap(), alias.parse().unwrap())
    }

    // ========================================================================
    // Download Endpoints
    // ========================================================================

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.endpoints.base_url, path))
            .send()
            .await
            .expect("Download request failed")
    }

    pub async fn get_file(&self, alias_id: i64, filename: &str) -> Response {
        self.get(&format!("/{}/{}", alias_id, filename)).await
    }

    pub async fn get_file_with_header(
        &self,
        alias_id: i64,
        filename: &str,
        name: &str,
        value: &str,
    ) -> Response {
        self.client
            .get(format!("{}/{}/{}", self.endpoints.base_url, alias_id, filename))
            .header(name, value)
            .send()
            .await
            .expect("Download request failed")
    }
}
