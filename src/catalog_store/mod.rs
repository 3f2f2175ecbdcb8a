mod models;
mod partition_catalog;
mod schema;
mod store;
mod trait_def;

pub use models::*;
pub use partition_catalog::PartitionCatalog;
pub use schema::CATALOG_VERSIONED_SCHEMAS;
pub use store::SqliteCatalog;
pub use trait_def::{Catalog, PlaceContent};
