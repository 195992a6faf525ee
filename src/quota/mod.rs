//! Daily listening quota and listening sessions.

mod governor;
mod models;
mod schema;
mod store;

pub use governor::{Clock, QuotaError, QuotaGovernor, SystemClock};
pub use models::{
    Caller, DailyUsage, ListeningSession, ProgressUpdate, QuotaLimit, QuotaPolicy, QuotaStatus,
    QuotaSubject, Tier,
};
pub use schema::{LISTENING_SCHEMA_SQL, LISTENING_SCHEMA_VERSION};
pub use store::{ListeningStore, SqliteListeningStore};
