//! Tiered storage: durable object store copies of spool content.

mod client;
mod feeder;
mod object_store;
mod retry_policy;
mod strategy;

pub use client::{container_name, SwiftClient};
pub use feeder::{FeedReport, SwiftFeeder};
pub use object_store::{read_body, MemoryObjectStore, ObjectBody, ObjectStore};
pub use retry_policy::RetryPolicy;
pub use strategy::{ObjectStoreStrategy, TieredObjectStore};
