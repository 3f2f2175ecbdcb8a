use super::RequestsLoggingLevel;
use crate::partition::Partition;

/// Per-partition HTTP settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub partition: Partition,
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub content_cache_age_sec: usize,
}

impl ServerConfig {
    pub fn new(partition: Partition) -> Self {
        ServerConfig {
            partition,
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 0,
            content_cache_age_sec: 86400,
        }
    }
}
