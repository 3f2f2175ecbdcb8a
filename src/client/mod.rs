//! Client for a librarian partition: uploads over the wire protocol,
//! downloads and searches over HTTP.

use crate::catalog_store::{AliasId, ContentId};
use crate::config::AppConfig;
use crate::error::{LibrarianError, LibrarianResult};
use crate::partition::Partition;
use crate::server::SearchHit;
use crate::storage::DigestAlgorithm;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Ids returned by a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedFile {
    pub content_id: ContentId,
    pub alias_id: AliasId,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub expires: Option<i64>,
    /// Send a `Content-Digest` header so the server verifies the bytes.
    pub send_digest: bool,
}

pub struct LibrarianClient {
    upload_addr: String,
    download_url: String,
    http: reqwest::Client,
    timeout: Duration,
    digest_algorithm: DigestAlgorithm,
}

impl LibrarianClient {
    /// `upload_addr` is `host:port` of the upload listener, `download_url`
    /// the base URL of the matching download listener.
    pub fn new(
        upload_addr: impl Into<String>,
        download_url: impl Into<String>,
        timeout: Duration,
        digest_algorithm: DigestAlgorithm,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            upload_addr: upload_addr.into(),
            download_url: download_url.into().trim_end_matches('/').to_string(),
            http,
            timeout,
            digest_algorithm,
        })
    }

    /// Client for one partition of the librarian described by `config`,
    /// reached at `host`. Virtualized callers get the longer timeout.
    pub fn for_partition(
        config: &AppConfig,
        partition: Partition,
        host: &str,
        virtualized: bool,
    ) -> Result<Self> {
        let settings = config.partition(partition);
        Self::new(
            format!("{}:{}", host, settings.upload_port),
            format!("http://{}:{}", host, settings.download_port),
            config.client_socket_timeout(virtualized),
            config.digest_algorithm,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn url_for(&self, alias_id: AliasId, filename: &str) -> String {
        format!(
            "{}/{}/{}",
            self.download_url,
            alias_id,
            urlencoding::encode(filename)
        )
    }

    pub async fn upload(
        &self,
        filename: &str,
        data: &[u8],
        options: &UploadOptions,
    ) -> LibrarianResult<UploadedFile> {
        let mut request = format!("STORE {} {}\r\n", data.len(), filename);
        if let Some(content_type) = &options.content_type {
            request.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        if options.send_digest {
            request.push_str(&format!(
                "Content-Digest: {}\r\n",
                self.digest_algorithm.digest_bytes(data)
            ));
        }
        if let Some(expires) = options.expires {
            request.push_str(&format!("Expires: {}\r\n", expires));
        }
        request.push_str("\r\n");

        let reply = tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(&self.upload_addr).await?;
            stream.write_all(request.as_bytes()).await?;
            stream.write_all(data).await?;
            stream.shutdown().await?;

            let mut reply = String::new();
            BufReader::new(stream).read_line(&mut reply).await?;
            Ok::<_, std::io::Error>(reply)
        })
        .await
        .map_err(|_| {
            LibrarianError::UpstreamUnavailable(format!("upload to {} timed out", self.upload_addr))
        })?
        .map_err(|e| LibrarianError::UpstreamUnavailable(format!("{}: {}", self.upload_addr, e)))?;

        debug!("Upload of {} answered: {}", filename, reply.trim_end());
        parse_reply(&reply)
    }

    pub async fn download(&self, alias_id: AliasId, filename: &str) -> LibrarianResult<Vec<u8>> {
        let url = self.url_for(alias_id, filename);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| LibrarianError::UpstreamUnavailable(format!("{}: {}", url, e)))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(LibrarianError::NotFound),
            status if status.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|e| LibrarianError::UpstreamUnavailable(e.to_string()))?
                .to_vec()),
            status => Err(LibrarianError::UpstreamUnavailable(format!(
                "{} answered {}",
                url, status
            ))),
        }
    }

    pub async fn search(&self, digest: &str) -> LibrarianResult<Vec<SearchHit>> {
        let url = format!("{}/search", self.download_url);
        let response = self
            .http
            .get(&url)
            .query(&[("digest", digest)])
            .send()
            .await
            .map_err(|e| LibrarianError::UpstreamUnavailable(format!("{}: {}", url, e)))?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            return Err(LibrarianError::Protocol(format!("invalid digest {:?}", digest)));
        }
        if !response.status().is_success() {
            return Err(LibrarianError::UpstreamUnavailable(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| LibrarianError::UpstreamUnavailable(format!("bad search reply: {}", e)))
    }
}

/// Turn the server's single reply line into ids or an error.
fn parse_reply(reply: &str) -> LibrarianResult<UploadedFile> {
    let reply = reply.trim_end();
    let (status, rest) = reply.split_once(' ').unwrap_or((reply, ""));
    match status {
        "200" => {
            let parsed = rest.split_once('/').and_then(|(content, alias)| {
                Some(UploadedFile {
                    content_id: content.parse().ok()?,
                    alias_id: alias.parse().ok()?,
                })
            });
            parsed.ok_or_else(|| LibrarianError::Protocol(format!("malformed reply {:?}", reply)))
        }
        "400" => Err(LibrarianError::Protocol(rest.to_string())),
        "" => Err(LibrarianError::UpstreamUnavailable(
            "connection closed without reply".to_string(),
        )),
        _ => Err(LibrarianError::UpstreamUnavailable(reply.to_string())),
    }
}
