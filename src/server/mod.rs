mod byte_range;
pub mod config;
mod download;
mod http_layers;
pub mod metrics;
pub mod proxy;
mod search;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub use proxy::UpstreamProxy;
pub(self) use search::make_search_routes;
pub use search::SearchHit;
pub use server::{make_app, make_metrics_app, run_metrics_server, run_server};
pub use state::ServerState;
