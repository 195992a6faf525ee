use axum::extract::FromRef;

use crate::catalog::CatalogStore;
use crate::gateway::TokenAccessGateway;
use crate::ingestion::{JobOrchestrator, JobQueue};
use crate::keys::KeyCustodian;
use crate::quota::QuotaGovernor;
use crate::similarity::SimilarityIndex;
use crate::storage::ObjectStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type GuardedSimilarityIndex = Arc<SimilarityIndex>;
pub type GuardedKeyCustodian = Arc<dyn KeyCustodian>;
pub type GuardedObjectStore = Arc<dyn ObjectStore>;
pub type GuardedOrchestrator = Arc<JobOrchestrator>;
pub type GuardedQuotaGovernor = Arc<QuotaGovernor>;
pub type GuardedAccessGateway = Arc<TokenAccessGateway>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub catalog: GuardedCatalogStore,
    pub similarity: GuardedSimilarityIndex,
    pub keys: GuardedKeyCustodian,
    pub objects: GuardedObjectStore,
    pub orchestrator: GuardedOrchestrator,
    pub job_queue: JobQueue,
    pub governor: GuardedQuotaGovernor,
    pub gateway: GuardedAccessGateway,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog.clone()
    }
}

impl FromRef<ServerState> for GuardedSimilarityIndex {
    fn from_ref(input: &ServerState) -> Self {
        input.similarity.clone()
    }
}

impl FromRef<ServerState> for GuardedKeyCustodian {
    fn from_ref(input: &ServerState) -> Self {
        input.keys.clone()
    }
}

impl FromRef<ServerState> for GuardedObjectStore {
    fn from_ref(input: &ServerState) -> Self {
        input.objects.clone()
    }
}

impl FromRef<ServerState> for GuardedOrchestrator {
    fn from_ref(input: &ServerState) -> Self {
        input.orchestrator.clone()
    }
}

impl FromRef<ServerState> for JobQueue {
    fn from_ref(input: &ServerState) -> Self {
        input.job_queue.clone()
    }
}

impl FromRef<ServerState> for GuardedQuotaGovernor {
    fn from_ref(input: &ServerState) -> Self {
        input.governor.clone()
    }
}

impl FromRef<ServerState> for GuardedAccessGateway {
    fn from_ref(input: &ServerState) -> Self {
        input.gateway.clone()
    }
}
