//! TCP listener speaking the upload protocol. One connection stores one file.

use super::protocol::{self, ProtocolError, UploadSession, MAX_LINE_LEN};
use crate::error::LibrarianError;
use crate::server::metrics;
use crate::storage::{CommitRequest, LibrarianStorage, StoredFile};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes handed to `infer` when the client sent no Content-Type.
const SNIFF_LEN: usize = 8 * 1024;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Bounds on discarding input left over after a reply.
const MAX_DRAIN_BYTES: u64 = 1024 * 1024;
const MAX_DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Why a connection ended without a commit.
#[derive(Debug)]
enum UploadFailure {
    /// Peer went away; nobody to answer.
    Disconnected(String),
    TimedOut,
    Rejected(LibrarianError),
}

impl From<LibrarianError> for UploadFailure {
    fn from(e: LibrarianError) -> Self {
        UploadFailure::Rejected(e)
    }
}

impl From<ProtocolError> for UploadFailure {
    fn from(e: ProtocolError) -> Self {
        UploadFailure::Rejected(e.into())
    }
}

pub struct UploadServer {
    storage: Arc<LibrarianStorage>,
    socket_timeout: Duration,
    max_upload_size: Option<u64>,
}

impl UploadServer {
    pub fn new(
        storage: Arc<LibrarianStorage>,
        socket_timeout: Duration,
        max_upload_size: Option<u64>,
    ) -> Self {
        Self {
            storage,
            socket_timeout,
            max_upload_size,
        }
    }

    /// Accept connections until `shutdown` fires. Each connection runs in its
    /// own task; in-flight uploads are not waited for.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let partition = self.storage.partition();
        match listener.local_addr() {
            Ok(addr) => info!("Upload server for {} listening on {}", partition, addr),
            Err(e) => warn!("Upload server for {} has no local address: {}", partition, e),
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept upload connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("Upload server for {} shutting down", partition);
                    break;
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let partition = self.storage.partition().as_str();
        debug!("Upload connection from {} on {}", peer, partition);
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut session = UploadSession::new(self.storage.digest_algorithm(), self.max_upload_size);

        let reply = match self.receive(&mut reader, &mut session).await {
            Ok(stored) => {
                info!(
                    "Stored {} ({} bytes) from {} as {}/{} in {}",
                    session.filename().unwrap_or_default(),
                    stored.size,
                    peer,
                    stored.content_id,
                    stored.alias_id,
                    partition
                );
                metrics::record_upload(partition, "committed", stored.size);
                protocol::success_reply(stored.content_id, stored.alias_id)
            }
            Err(UploadFailure::Rejected(e)) => {
                let status = e.upload_status();
                if status == 400 {
                    warn!("Rejected upload from {}: {}", peer, e);
                    metrics::record_upload(partition, "rejected", 0);
                } else {
                    error!("Upload from {} failed: {}", peer, e);
                    metrics::record_upload(partition, "failed", 0);
                }
                protocol::error_reply(status, &e.to_string())
            }
            Err(UploadFailure::TimedOut) => {
                warn!("Upload from {} timed out in state {:?}", peer, session.state());
                metrics::record_upload(partition, "timeout", 0);
                return;
            }
            Err(UploadFailure::Disconnected(reason)) => {
                debug!("Upload peer {} went away: {}", peer, reason);
                metrics::record_upload(partition, "aborted", 0);
                return;
            }
        };

        let sent = tokio::time::timeout(self.socket_timeout, async {
            writer.write_all(reply.as_bytes()).await?;
            writer.shutdown().await
        })
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to send reply to {}: {}", peer, e),
            Err(_) => debug!("Timed out sending reply to {}", peer),
        }
        // Closing with unread input resets the connection, which can
        // discard the reply before the peer reads it.
        self.drain(&mut reader).await;
        session.close();
    }

    async fn drain(&self, reader: &mut BufReader<OwnedReadHalf>) {
        let mut sink = (&mut *reader).take(MAX_DRAIN_BYTES);
        let wait = self.socket_timeout.min(MAX_DRAIN_WAIT);
        let _ = tokio::time::timeout(wait, tokio::io::copy(&mut sink, &mut tokio::io::sink())).await;
    }

    async fn receive(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        session: &mut UploadSession,
    ) -> Result<StoredFile, UploadFailure> {
        let command = match self.read_line(reader).await? {
            Some(line) => line,
            None => return Err(UploadFailure::Disconnected("closed before command".into())),
        };
        session.accept_command(&command)?;

        loop {
            let line = self
                .read_line(reader)
                .await?
                .ok_or_else(|| UploadFailure::Disconnected("closed inside headers".into()))?;
            if session.accept_header_line(&line)? {
                break;
            }
        }

        // accept_command guarantees both are set
        let size = session.size().unwrap_or_default();
        let filename = session.filename().unwrap_or_default().to_string();

        let mut handle = self.storage.begin_upload()?;
        let mut sniffed: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.timed(reader.read(&mut buf[..want])).await?;
            if n == 0 {
                return Err(ProtocolError::Truncated {
                    expected: size,
                    received: size - remaining,
                }
                .into());
            }
            if sniffed.len() < SNIFF_LEN {
                let take = n.min(SNIFF_LEN - sniffed.len());
                sniffed.extend_from_slice(&buf[..take]);
            }
            handle.write(&buf[..n]).await?;
            remaining -= n as u64;
        }

        self.await_peer_close(reader, size).await?;
        session.finish_body()?;

        let headers = session.headers().clone();
        let mime_type = headers
            .content_type
            .or_else(|| infer::get(&sniffed).map(|kind| kind.mime_type().to_string()))
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let stored = self
            .storage
            .commit(
                handle,
                CommitRequest {
                    filename,
                    mime_type,
                    expires: headers.expires,
                    expected_digest: headers.content_digest,
                    expected_size: Some(size),
                },
            )
            .await?;
        Ok(stored)
    }

    /// The body ends where the peer half-closes. Anything arriving before
    /// that is an overrun, and a peer that neither closes nor sends more is
    /// dropped once the socket timeout expires.
    async fn await_peer_close(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        expected: u64,
    ) -> Result<(), UploadFailure> {
        let mut extra = [0u8; 1];
        match self.timed(reader.read(&mut extra)).await? {
            0 => Ok(()),
            _ => Err(ProtocolError::Overrun { expected }.into()),
        }
    }

    /// Read one line, bounded by the socket timeout and `MAX_LINE_LEN`.
    /// `None` means the peer closed the connection.
    async fn read_line(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
    ) -> Result<Option<String>, UploadFailure> {
        let mut line = String::new();
        let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64);
        let n = match tokio::time::timeout(self.socket_timeout, limited.read_line(&mut line)).await
        {
            Err(_) => return Err(UploadFailure::TimedOut),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(LibrarianError::Protocol("line is not valid UTF-8".into()).into())
            }
            Ok(Err(e)) => return Err(UploadFailure::Disconnected(e.to_string())),
            Ok(Ok(n)) => n,
        };
        if n == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') {
            if n >= MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong.into());
            }
            return Err(UploadFailure::Disconnected("closed mid-line".into()));
        }
        Ok(Some(line))
    }

    async fn timed<F>(&self, fut: F) -> Result<usize, UploadFailure>
    where
        F: std::future::Future<Output = std::io::Result<usize>>,
    {
        match tokio::time::timeout(self.socket_timeout, fut).await {
            Err(_) => Err(UploadFailure::TimedOut),
            Ok(Err(e)) => Err(UploadFailure::Disconnected(e.to_string())),
            Ok(Ok(n)) => Ok(n),
        }
    }
}
