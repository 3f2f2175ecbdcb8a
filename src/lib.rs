//! Librarian: a content-addressable file store with an upload protocol
//! server, HTTP download servers and tiered object storage.
//!
//! This library exposes the internal modules for the binaries and tests.

pub mod app;
pub mod background_jobs;
pub mod catalog_store;
pub mod client;
pub mod config;
pub mod error;
pub mod gc;
pub mod partition;
pub mod server;
pub mod sqlite_persistence;
pub mod storage;
pub mod swift;
pub mod upload;

// Re-export commonly used types for convenience
pub use app::Librarian;
pub use client::{LibrarianClient, UploadOptions, UploadedFile};
pub use error::{LibrarianError, LibrarianResult};
pub use partition::Partition;
pub use server::{run_server, RequestsLoggingLevel};
