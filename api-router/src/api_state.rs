use std::sync::Arc;

use common::policy::PolicyEngine;
use common::storage::db::SurrealDbClient;
use common::utils::config::AppConfig;
use consultation_pipeline::ConsultationEngine;
use ingestion_pipeline::IngestionCoordinator;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub coordinator: Arc<IngestionCoordinator>,
    pub consultation: Arc<ConsultationEngine>,
    pub policy: Arc<PolicyEngine>,
}
