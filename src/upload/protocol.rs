//! Line-level parsing and per-connection state of the upload protocol.
//!
//! ```text
//! STORE <size> <filename>
//! Content-Type: text/plain
//! Content-Digest: <hex>
//! Expires: <unix seconds>
//!
//! <size bytes>
//! ```

use crate::error::LibrarianError;
use crate::storage::DigestAlgorithm;
use thiserror::Error;

/// Longest accepted filename, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Longest accepted command or header line, terminator included.
pub const MAX_LINE_LEN: usize = 8 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(&'static str),

    #[error("invalid size {0:?}")]
    InvalidSize(String),

    #[error("upload of {size} bytes exceeds limit of {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("malformed header line {0:?}")]
    MalformedHeader(String),

    #[error("invalid {header} value {value:?}")]
    InvalidHeaderValue { header: &'static str, value: String },

    #[error("line too long")]
    LineTooLong,

    #[error("connection closed after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("more than {expected} bytes sent")]
    Overrun { expected: u64 },

    #[error("{0} not allowed in state {1:?}")]
    UnexpectedInput(&'static str, UploadState),
}

impl From<ProtocolError> for LibrarianError {
    fn from(e: ProtocolError) -> Self {
        LibrarianError::Protocol(e.to_string())
    }
}

/// Where a connection is in its single upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    AwaitName,
    AwaitSize,
    AwaitHeaders,
    StreamingBytes,
    AwaitCommitAck,
    Closed,
}

/// Headers the server acts on. Anything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadHeaders {
    pub content_type: Option<String>,
    pub content_digest: Option<String>,
    pub expires: Option<i64>,
}

/// Accumulates what the client declared before the body.
#[derive(Debug)]
pub struct UploadSession {
    state: UploadState,
    digest_algorithm: DigestAlgorithm,
    max_upload_size: Option<u64>,
    filename: Option<String>,
    size: Option<u64>,
    headers: UploadHeaders,
}

/// Strip one trailing `\n` or `\r\n`.
pub fn trim_line_end(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Split `STORE <size> <filename>` into its raw size and filename tokens.
/// The filename is everything after the size and may contain spaces.
pub fn parse_command(line: &str) -> Result<(&str, &str), ProtocolError> {
    let line = trim_line_end(line);
    let mut parts = line.splitn(3, ' ');
    match parts.next() {
        Some("STORE") => {}
        other => {
            return Err(ProtocolError::UnknownCommand(
                other.unwrap_or_default().to_string(),
            ))
        }
    }
    let size = parts
        .next()
        .ok_or_else(|| ProtocolError::InvalidSize(String::new()))?;
    let filename = parts
        .next()
        .ok_or(ProtocolError::InvalidFilename("missing"))?;
    Ok((size, filename))
}

impl UploadSession {
    pub fn new(digest_algorithm: DigestAlgorithm, max_upload_size: Option<u64>) -> Self {
        Self {
            state: UploadState::AwaitName,
            digest_algorithm,
            max_upload_size,
            filename: None,
            size: None,
            headers: UploadHeaders::default(),
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn headers(&self) -> &UploadHeaders {
        &self.headers
    }

    fn expect_state(&self, wanted: UploadState, what: &'static str) -> Result<(), ProtocolError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedInput(what, self.state))
        }
    }

    /// Handle the command line, moving through the name and size states.
    pub fn accept_command(&mut self, line: &str) -> Result<(), ProtocolError> {
        let (size, filename) = parse_command(line)?;
        self.accept_name(filename)?;
        self.accept_size(size)
    }

    pub fn accept_name(&mut self, filename: &str) -> Result<(), ProtocolError> {
        self.expect_state(UploadState::AwaitName, "filename")?;
        if filename.is_empty() {
            return Err(ProtocolError::InvalidFilename("empty"));
        }
        if filename.len() > MAX_FILENAME_LEN {
            return Err(ProtocolError::InvalidFilename("too long"));
        }
        if filename.contains('/') {
            return Err(ProtocolError::InvalidFilename("contains '/'"));
        }
        if filename.chars().any(char::is_control) {
            return Err(ProtocolError::InvalidFilename("contains control characters"));
        }
        self.filename = Some(filename.to_string());
        self.state = UploadState::AwaitSize;
        Ok(())
    }

    pub fn accept_size(&mut self, raw: &str) -> Result<(), ProtocolError> {
        self.expect_state(UploadState::AwaitSize, "size")?;
        // u64 parsing accepts a leading '+', which the protocol does not
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidSize(raw.to_string()));
        }
        let size: u64 = raw
            .parse()
            .map_err(|_| ProtocolError::InvalidSize(raw.to_string()))?;
        if let Some(max) = self.max_upload_size {
            if size > max {
                return Err(ProtocolError::TooLarge { size, max });
            }
        }
        self.size = Some(size);
        self.state = UploadState::AwaitHeaders;
        Ok(())
    }

    /// Feed one header line. An empty line ends the header block and starts
    /// the body; returns true when that happens.
    pub fn accept_header_line(&mut self, line: &str) -> Result<bool, ProtocolError> {
        self.expect_state(UploadState::AwaitHeaders, "header")?;
        let line = trim_line_end(line);
        if line.is_empty() {
            self.state = UploadState::StreamingBytes;
            return Ok(true);
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(ProtocolError::MalformedHeader(line.to_string()));
        }

        if name.eq_ignore_ascii_case("content-type") {
            if !value.is_empty() {
                self.headers.content_type = Some(value.to_string());
            }
        } else if name.eq_ignore_ascii_case("content-digest") {
            if !self.digest_algorithm.is_valid_hex(value) {
                return Err(ProtocolError::InvalidHeaderValue {
                    header: "Content-Digest",
                    value: value.to_string(),
                });
            }
            self.headers.content_digest = Some(value.to_ascii_lowercase());
        } else if name.eq_ignore_ascii_case("expires") {
            let expires = value
                .parse::<i64>()
                .map_err(|_| ProtocolError::InvalidHeaderValue {
                    header: "Expires",
                    value: value.to_string(),
                })?;
            self.headers.expires = Some(expires);
        }
        Ok(false)
    }

    /// All declared bytes arrived.
    pub fn finish_body(&mut self) -> Result<(), ProtocolError> {
        self.expect_state(UploadState::StreamingBytes, "end of body")?;
        self.state = UploadState::AwaitCommitAck;
        Ok(())
    }

    /// The reply went out.
    pub fn close(&mut self) {
        self.state = UploadState::Closed;
    }
}

/// Reply line for a committed upload.
pub fn success_reply(content_id: i64, alias_id: i64) -> String {
    format!("200 {}/{}\r\n", content_id, alias_id)
}

/// Reply line for a failed upload. Newlines in the reason are flattened so
/// the reply stays on one line.
pub fn error_reply(status: u16, reason: &str) -> String {
    let reason: String = reason
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("{} {}\r\n", status, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> UploadSession {
        UploadSession::new(DigestAlgorithm::Sha256, Some(1024))
    }

    #[test]
    fn walks_through_states() {
        let mut s = session();
        assert_eq!(s.state(), UploadState::AwaitName);
        s.accept_command("STORE 8 build log.txt\r\n").unwrap();
        assert_eq!(s.state(), UploadState::AwaitHeaders);
        assert_eq!(s.filename(), Some("build log.txt"));
        assert_eq!(s.size(), Some(8));

        assert!(!s.accept_header_line("content-type: text/plain\r\n").unwrap());
        assert!(!s.accept_header_line("Expires: 1700000000\n").unwrap());
        assert!(!s.accept_header_line("X-Whatever: ignored\r\n").unwrap());
        assert!(s.accept_header_line("\r\n").unwrap());
        assert_eq!(s.state(), UploadState::StreamingBytes);

        s.finish_body().unwrap();
        assert_eq!(s.state(), UploadState::AwaitCommitAck);
        s.close();
        assert_eq!(s.state(), UploadState::Closed);

        assert_eq!(s.headers().content_type.as_deref(), Some("text/plain"));
        assert_eq!(s.headers().expires, Some(1_700_000_000));
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(matches!(
            session().accept_command("FETCH 1 a\r\n"),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            session().accept_command("STORE 1\r\n"),
            Err(ProtocolError::InvalidFilename("missing"))
        ));
        assert!(matches!(
            session().accept_command("STORE -1 a\r\n"),
            Err(ProtocolError::InvalidSize(_))
        ));
        assert!(matches!(
            session().accept_command("STORE +1 a\r\n"),
            Err(ProtocolError::InvalidSize(_))
        ));
        assert!(matches!(
            session().accept_command("STORE 1 a/b\r\n"),
            Err(ProtocolError::InvalidFilename(_))
        ));
        assert_eq!(
            session().accept_command("STORE 2048 big\r\n"),
            Err(ProtocolError::TooLarge {
                size: 2048,
                max: 1024
            })
        );
        let long = "x".repeat(MAX_FILENAME_LEN + 1);
        assert!(session()
            .accept_command(&format!("STORE 1 {}\r\n", long))
            .is_err());
    }

    #[test]
    fn zero_size_is_valid() {
        let mut s = session();
        s.accept_command("STORE 0 empty\n").unwrap();
        assert_eq!(s.size(), Some(0));
    }

    #[test]
    fn validates_digest_header() {
        let mut s = session();
        s.accept_command("STORE 1 a\r\n").unwrap();
        assert!(s.accept_header_line("Content-Digest: nothex\r\n").is_err());

        let digest = "AB".repeat(32);
        s.accept_header_line(&format!("Content-Digest: {}\r\n", digest))
            .unwrap();
        assert_eq!(
            s.headers().content_digest.as_deref(),
            Some("ab".repeat(32).as_str())
        );
    }

    #[test]
    fn headers_before_command_are_rejected() {
        let mut s = session();
        assert!(matches!(
            s.accept_header_line("Content-Type: a/b\r\n"),
            Err(ProtocolError::UnexpectedInput("header", UploadState::AwaitName))
        ));
        assert!(s.finish_body().is_err());
    }

    #[test]
    fn malformed_header() {
        let mut s = session();
        s.accept_command("STORE 1 a\r\n").unwrap();
        assert!(matches!(
            s.accept_header_line("no colon here\r\n"),
            Err(ProtocolError::MalformedHeader(_))
        ));
    }

    #[test]
    fn replies_are_single_lines() {
        assert_eq!(success_reply(42, 7), "200 42/7\r\n");
        assert_eq!(error_reply(400, "bad\r\nthing"), "400 bad  thing\r\n");
    }
}
