//! OpenStack Swift REST client.
//!
//! Objects are named after their content id and spread over containers of a
//! million ids each. Files larger than the segment size are uploaded as
//! numbered segments under `<id>/` plus a dynamic large object manifest.

use super::object_store::{ObjectBody, ObjectStore};
use crate::catalog_store::ContentId;
use crate::config::SwiftCredentials;
use crate::error::{LibrarianError, LibrarianResult};
use anyhow::Result;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{header, RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const OBJECT_MANIFEST_HEADER: &str = "X-Object-Manifest";
const CONTENT_IDS_PER_CONTAINER: ContentId = 1_000_000;

pub fn container_name(content_id: ContentId) -> String {
    format!("librarian_{}", content_id / CONTENT_IDS_PER_CONTAINER)
}

fn segment_name(content_id: ContentId, index: u64) -> String {
    format!("{}/{:08}", content_id, index)
}

/// Drive `request` while `sent` keeps advancing. Fails once a whole `idle`
/// period passes without progress, however long the transfer takes overall.
async fn until_stalled<T, F>(idle: Duration, sent: &AtomicU64, request: F) -> LibrarianResult<T>
where
    F: Future<Output = LibrarianResult<T>>,
{
    tokio::pin!(request);
    let mut ticker = tokio::time::interval(idle);
    ticker.tick().await;
    let mut last = sent.load(Ordering::Relaxed);
    loop {
        tokio::select! {
            result = &mut request => return result,
            _ = ticker.tick() => {
                let now = sent.load(Ordering::Relaxed);
                if now == last {
                    return Err(LibrarianError::ObjectStoreTimeout(idle.as_secs()));
                }
                last = now;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SwiftSession {
    storage_url: String,
    token: String,
}

pub struct SwiftClient {
    name: String,
    http: reqwest::Client,
    credentials: SwiftCredentials,
    segment_size: u64,
    timeout: Duration,
    session: RwLock<Option<SwiftSession>>,
}

impl SwiftClient {
    pub fn new(
        name: &str,
        credentials: SwiftCredentials,
        segment_size: u64,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            name: name.to_string(),
            http,
            credentials,
            segment_size: segment_size.max(1),
            timeout,
            session: RwLock::new(None),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> LibrarianError {
        if err.is_timeout() {
            LibrarianError::ObjectStoreTimeout(self.timeout.as_secs())
        } else {
            LibrarianError::ObjectStore(format!("{}: {}", self.name, err))
        }
    }

    fn status_error(&self, what: &str, status: StatusCode) -> LibrarianError {
        LibrarianError::ObjectStore(format!("{}: {} returned {}", self.name, what, status))
    }

    async fn session(&self, refresh: bool) -> LibrarianResult<SwiftSession> {
        let (auth_url, user, key) = match &self.credentials {
            SwiftCredentials::Static {
                storage_url,
                auth_token,
            } => {
                return Ok(SwiftSession {
                    storage_url: storage_url.trim_end_matches('/').to_string(),
                    token: auth_token.clone(),
                })
            }
            SwiftCredentials::TempAuth {
                auth_url,
                user,
                key,
            } => (auth_url, user, key),
        };

        if !refresh {
            if let Some(session) = self.session.read().await.clone() {
                return Ok(session);
            }
        }

        debug!("Authenticating against {} as {}", auth_url, user);
        let response = self
            .http
            .get(auth_url)
            .header("X-Auth-User", user)
            .header("X-Auth-Key", key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.status().is_success() {
            return Err(self.status_error("auth", response.status()));
        }
        let header_value = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let session = match (header_value("x-storage-url"), header_value("x-auth-token")) {
            (Some(storage_url), Some(token)) => SwiftSession {
                storage_url: storage_url.trim_end_matches('/').to_string(),
                token,
            },
            _ => {
                return Err(LibrarianError::ObjectStore(format!(
                    "{}: auth response lacks storage url or token",
                    self.name
                )))
            }
        };
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// Send a request built from the current session, re-authenticating once
    /// if the token was rejected.
    async fn send<F, Fut>(&self, build: F) -> LibrarianResult<Response>
    where
        F: Fn(SwiftSession) -> Fut,
        Fut: Future<Output = LibrarianResult<RequestBuilder>>,
    {
        let can_reauth = matches!(self.credentials, SwiftCredentials::TempAuth { .. });
        let mut refreshed = false;
        loop {
            let session = self.session(refreshed).await?;
            let response = build(session)
                .await?
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;
            if response.status() == StatusCode::UNAUTHORIZED && can_reauth && !refreshed {
                warn!("{} token rejected, re-authenticating", self.name);
                refreshed = true;
                continue;
            }
            return Ok(response);
        }
    }

    async fn ensure_container(&self, container: &str) -> LibrarianResult<()> {
        let response = self
            .send(|session| async move {
                Ok::<_, LibrarianError>(self
                    .http
                    .put(format!("{}/{}", session.storage_url, container))
                    .header(AUTH_TOKEN_HEADER, session.token)
                    .header(header::CONTENT_LENGTH, 0)
                    .timeout(self.timeout))
            })
            .await?;
        if !response.status().is_success() {
            return Err(self.status_error("container PUT", response.status()));
        }
        Ok(())
    }

    /// Upload `len` bytes of `path` starting at `offset` as one object.
    /// Bounded by idle time rather than total time.
    async fn put_range(
        &self,
        container: &str,
        object: &str,
        path: &Path,
        offset: u64,
        len: u64,
    ) -> LibrarianResult<()> {
        let sent = Arc::new(AtomicU64::new(0));
        let request = self.send(|session| {
            let sent = Arc::clone(&sent);
            async move {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                let chunks = ReaderStream::new(file.take(len)).inspect_ok(move |chunk| {
                    sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                });
                Ok::<_, LibrarianError>(self
                    .http
                    .put(format!("{}/{}/{}", session.storage_url, container, object))
                    .header(AUTH_TOKEN_HEADER, session.token)
                    .header(header::CONTENT_LENGTH, len)
                    .body(reqwest::Body::wrap_stream(chunks)))
            }
        });
        let response = until_stalled(self.timeout, &sent, request).await?;
        if !response.status().is_success() {
            return Err(self.status_error("object PUT", response.status()));
        }
        Ok(())
    }

    async fn put_manifest(&self, container: &str, content_id: ContentId) -> LibrarianResult<()> {
        let prefix = format!("{}/{}/", container, content_id);
        let response = self
            .send(|session| {
                let prefix = prefix.clone();
                async move {
                    Ok::<_, LibrarianError>(self
                        .http
                        .put(format!("{}/{}/{}", session.storage_url, container, content_id))
                        .header(AUTH_TOKEN_HEADER, session.token)
                        .header(OBJECT_MANIFEST_HEADER, prefix)
                        .header(header::CONTENT_LENGTH, 0)
                        .timeout(self.timeout))
                }
            })
            .await?;
        if !response.status().is_success() {
            return Err(self.status_error("manifest PUT", response.status()));
        }
        Ok(())
    }

    async fn list_segments(
        &self,
        container: &str,
        content_id: ContentId,
    ) -> LibrarianResult<Vec<String>> {
        let prefix = format!("{}/", content_id);
        let response = self
            .send(|session| {
                let prefix = prefix.clone();
                async move {
                    Ok::<_, LibrarianError>(self
                        .http
                        .get(format!("{}/{}", session.storage_url, container))
                        .query(&[("prefix", prefix)])
                        .header(AUTH_TOKEN_HEADER, session.token)
                        .timeout(self.timeout))
                }
            })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(Vec::new()),
            status if status.is_success() => {
                let text = response.text().await.map_err(|e| self.transport_error(e))?;
                Ok(text
                    .lines()
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect())
            }
            status => Err(self.status_error("container listing", status)),
        }
    }

    async fn delete_object(&self, container: &str, object: &str) -> LibrarianResult<()> {
        let response = self
            .send(|session| async move {
                Ok::<_, LibrarianError>(self
                    .http
                    .delete(format!("{}/{}/{}", session.storage_url, container, object))
                    .header(AUTH_TOKEN_HEADER, session.token)
                    .timeout(self.timeout))
            })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(self.status_error("object DELETE", status)),
        }
    }
}

#[async_trait]
impl ObjectStore for SwiftClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_file(&self, content_id: ContentId, path: &Path, size: u64) -> LibrarianResult<()> {
        let container = container_name(content_id);
        self.ensure_container(&container).await?;

        let object = content_id.to_string();
        if size <= self.segment_size {
            return self.put_range(&container, &object, path, 0, size).await;
        }

        let mut index = 0;
        let mut offset = 0;
        while offset < size {
            let len = self.segment_size.min(size - offset);
            self.put_range(&container, &segment_name(content_id, index), path, offset, len)
                .await?;
            offset += len;
            index += 1;
        }
        debug!(
            "Uploaded content {} to {} as {} segments",
            content_id, self.name, index
        );
        self.put_manifest(&container, content_id).await
    }

    async fn get(&self, content_id: ContentId) -> LibrarianResult<Option<ObjectBody>> {
        let container = container_name(content_id);
        let response = self
            .send(|session| {
                let container = container.clone();
                async move {
                    Ok::<_, LibrarianError>(self
                        .http
                        .get(format!("{}/{}/{}", session.storage_url, container, content_id))
                        .header(AUTH_TOKEN_HEADER, session.token))
                }
            })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let size = response.content_length().ok_or_else(|| {
                    LibrarianError::ObjectStore(format!(
                        "{}: object {} has no Content-Length",
                        self.name, content_id
                    ))
                })?;
                let stream = response
                    .bytes_stream()
                    .map_err(std::io::Error::other)
                    .boxed();
                Ok(Some(ObjectBody { size, stream }))
            }
            status => Err(self.status_error("object GET", status)),
        }
    }

    async fn exists(&self, content_id: ContentId) -> LibrarianResult<bool> {
        let container = container_name(content_id);
        let response = self
            .send(|session| {
                let container = container.clone();
                async move {
                    Ok::<_, LibrarianError>(self
                        .http
                        .head(format!("{}/{}/{}", session.storage_url, container, content_id))
                        .header(AUTH_TOKEN_HEADER, session.token)
                        .timeout(self.timeout))
                }
            })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(self.status_error("object HEAD", status)),
        }
    }

    async fn delete(&self, content_id: ContentId) -> LibrarianResult<()> {
        let container = container_name(content_id);
        self.delete_object(&container, &content_id.to_string())
            .await?;
        for segment in self.list_segments(&container, content_id).await? {
            self.delete_object(&container, &segment).await?;
        }
        Ok(())
    }
}
