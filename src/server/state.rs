use axum::extract::FromRef;

use crate::storage::LibrarianStorage;
use std::sync::Arc;
use std::time::Instant;

use super::proxy::UpstreamProxy;
use super::ServerConfig;

pub type GuardedStorage = Arc<LibrarianStorage>;
pub type OptionalProxy = Option<Arc<UpstreamProxy>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub storage: GuardedStorage,
    pub proxy: OptionalProxy,
    pub hash: String,
}

impl ServerState {
    pub fn new(config: ServerConfig, storage: GuardedStorage, proxy: OptionalProxy) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            storage,
            proxy,
            hash: env!("LIBRARIAN_REVISION").to_owned(),
        }
    }
}

impl FromRef<ServerState> for GuardedStorage {
    fn from_ref(input: &ServerState) -> Self {
        input.storage.clone()
    }
}

impl FromRef<ServerState> for OptionalProxy {
    fn from_ref(input: &ServerState) -> Self {
        input.proxy.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
