use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    error::AppError,
    policy::PolicyEngine,
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
        llm::{LanguageModel, LlmRouter},
    },
};
use consultation_pipeline::ConsultationEngine;
use ingestion_pipeline::{run_worker_loop, IngestionCoordinator};
use reflection_loop::ReflectionLoop;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// sysexits-style process exit codes.
mod exit_code {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 64;
    pub const DATA_ERR: i32 = 65;
    pub const UNAVAILABLE: i32 = 69;
    pub const NO_PERM: i32 = 77;
}

fn exit_code_for(err: &AppError) -> i32 {
    match err {
        AppError::Validation(_) => exit_code::DATA_ERR,
        AppError::Auth(_) | AppError::Forbidden { .. } => exit_code::NO_PERM,
        AppError::Database(_) | AppError::StoreUnavailable(_) | AppError::LLMUnavailable(_) => {
            exit_code::UNAVAILABLE
        }
        _ => exit_code::UNAVAILABLE,
    }
}

#[tokio::main]
async fn main() {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = match get_config() {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            std::process::exit(exit_code::USAGE);
        }
    };

    match run(config).await {
        Ok(()) => std::process::exit(exit_code::OK),
        Err(err) => {
            error!("fatal: {err}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    db.ensure_initialized(config.embedding_dimensions as usize)
        .await?;
    info!(
        embedding_dimensions = config.embedding_dimensions,
        "store initialized"
    );

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedder = Arc::new(EmbeddingProvider::from_config(
        &config,
        Arc::clone(&openai_client),
    ));
    let llm: Arc<dyn LanguageModel> = Arc::new(LlmRouter::from_config(&config));

    let policy = Arc::new(PolicyEngine::new(Arc::clone(&db)));

    let (coordinator, job_rx) = IngestionCoordinator::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        config.tuning.clone(),
        config.deadlines.clone(),
    );

    let consultation = Arc::new(ConsultationEngine::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        Arc::clone(&policy),
        config.tuning.clone(),
        config.deadlines.clone(),
    ));

    let reflection = Arc::new(ReflectionLoop::new(
        Arc::clone(&db),
        Arc::clone(&llm),
        config.tuning.clone(),
        &config.deadlines,
    ));

    // Background services: the ingestion worker drains the queue, the
    // reflection loop runs decay and insight generation on its own cadence.
    tokio::spawn(run_worker_loop(Arc::clone(&coordinator), job_rx));
    tokio::spawn(Arc::clone(&reflection).run());

    let api_state = ApiState {
        db,
        config: config.clone(),
        coordinator,
        consultation,
        policy,
    };
    let app = Router::new().nest("/api/v1", api_routes_v1(&api_state));

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(&serve_address)
        .await
        .map_err(AppError::Io)?;

    axum::serve(listener, app).await.map_err(AppError::Io)?;

    Ok(())
}
