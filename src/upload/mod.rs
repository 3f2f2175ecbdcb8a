//! The streaming upload protocol: parsing in [`protocol`], the TCP listener
//! in [`server`].

pub mod protocol;
mod server;

pub use protocol::{ProtocolError, UploadHeaders, UploadSession, UploadState};
pub use server::UploadServer;
