//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestLibrarian, TestClient};
//! use librarian::Partition;
//!
//! #[tokio::test]
//! async fn test_upload() {
//!     let server = TestLibrarian::spawn().await;
//!     let client = TestClient::new(server.endpoints(Partition::Public));
//!
//!     let reply = client.raw_upload(b"STORE 3 a.txt\r\n\r\nabc").await;
//!     assert!(reply.starts_with("200 "));
//! }
//! ```

mod client;
mod constants;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
pub use server::{Endpoints, TestLibrarian, TestOptions};
