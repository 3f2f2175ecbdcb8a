mod http_cache;
mod requests_logging;

pub use http_cache::{http_cache, CachePolicy};
pub use requests_logging::{log_requests, RequestsLoggingLevel};
