//! Published tracks and the analysis data attached to them.

mod models;
mod schema;
mod store;

pub use models::{NewTrack, Track, TrackPatch, TrackStatus};
pub use schema::{CATALOG_SCHEMA_SQL, CATALOG_SCHEMA_VERSION};
pub use store::{CatalogStore, SqliteCatalogStore};
