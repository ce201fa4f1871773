use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct LlmProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Tunables the source kept scattered across files; exposed as configuration
/// so deployments can adjust them without a rebuild.
#[derive(Clone, Deserialize, Debug)]
pub struct KernelTuning {
    #[serde(default = "default_decay_daily_rate")]
    pub decay_daily_rate: f64,
    #[serde(default = "default_protection_window_secs")]
    pub protection_window_secs: u64,
    #[serde(default = "default_reflection_interval_secs")]
    pub reflection_interval_secs: u64,
    #[serde(default = "default_summary_every_ticks")]
    pub summary_every_ticks: u32,
    #[serde(default = "default_insight_pairs_per_tick")]
    pub insight_pairs_per_tick: usize,
    #[serde(default = "default_boost_amount")]
    pub boost_amount: f32,
    #[serde(default = "default_spread_gamma")]
    pub spread_gamma: f32,
    #[serde(default = "default_spread_depth")]
    pub spread_depth: usize,
    #[serde(default = "default_rank_alpha")]
    pub rank_alpha: f32,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    #[serde(default = "default_candidate_min_score")]
    pub candidate_min_score: f32,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_recall_min_score")]
    pub recall_min_score: f32,
    #[serde(default = "default_seed_fts_limit")]
    pub seed_fts_limit: usize,
    #[serde(default = "default_seed_recency_limit")]
    pub seed_recency_limit: usize,
    #[serde(default = "default_seed_vector_limit")]
    pub seed_vector_limit: usize,
    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,
    #[serde(default = "default_ingestion_queue_capacity")]
    pub ingestion_queue_capacity: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_representative_stride")]
    pub representative_stride: usize,
    #[serde(default = "default_tier3_llm_call_budget")]
    pub tier3_llm_call_budget: usize,
    #[serde(default = "default_tree_branching")]
    pub tree_branching: usize,
}

fn default_decay_daily_rate() -> f64 {
    0.005
}
fn default_protection_window_secs() -> u64 {
    86_400
}
fn default_reflection_interval_secs() -> u64 {
    3_600
}
fn default_summary_every_ticks() -> u32 {
    10
}
fn default_insight_pairs_per_tick() -> usize {
    8
}
fn default_boost_amount() -> f32 {
    0.15
}
fn default_spread_gamma() -> f32 {
    0.5
}
fn default_spread_depth() -> usize {
    2
}
fn default_rank_alpha() -> f32 {
    0.7
}
fn default_dedup_threshold() -> f32 {
    0.92
}
fn default_candidate_min_score() -> f32 {
    0.3
}
fn default_candidate_k() -> usize {
    5
}
fn default_recall_min_score() -> f32 {
    0.1
}
fn default_seed_fts_limit() -> usize {
    30
}
fn default_seed_recency_limit() -> usize {
    30
}
fn default_seed_vector_limit() -> usize {
    20
}
fn default_context_top_k() -> usize {
    10
}
fn default_ingestion_queue_capacity() -> usize {
    1024
}
fn default_retention_days() -> i64 {
    30
}
fn default_chunk_size() -> usize {
    512
}
fn default_representative_stride() -> usize {
    5
}
fn default_tier3_llm_call_budget() -> usize {
    10
}
fn default_tree_branching() -> usize {
    10
}

impl Default for KernelTuning {
    fn default() -> Self {
        Self {
            decay_daily_rate: default_decay_daily_rate(),
            protection_window_secs: default_protection_window_secs(),
            reflection_interval_secs: default_reflection_interval_secs(),
            summary_every_ticks: default_summary_every_ticks(),
            insight_pairs_per_tick: default_insight_pairs_per_tick(),
            boost_amount: default_boost_amount(),
            spread_gamma: default_spread_gamma(),
            spread_depth: default_spread_depth(),
            rank_alpha: default_rank_alpha(),
            dedup_threshold: default_dedup_threshold(),
            candidate_min_score: default_candidate_min_score(),
            candidate_k: default_candidate_k(),
            recall_min_score: default_recall_min_score(),
            seed_fts_limit: default_seed_fts_limit(),
            seed_recency_limit: default_seed_recency_limit(),
            seed_vector_limit: default_seed_vector_limit(),
            context_top_k: default_context_top_k(),
            ingestion_queue_capacity: default_ingestion_queue_capacity(),
            retention_days: default_retention_days(),
            chunk_size: default_chunk_size(),
            representative_stride: default_representative_stride(),
            tier3_llm_call_budget: default_tier3_llm_call_budget(),
            tree_branching: default_tree_branching(),
        }
    }
}

/// Per-call deadlines for external dependencies.
#[derive(Clone, Deserialize, Debug)]
pub struct DeadlineConfig {
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub synthesis_timeout_secs: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,
}

fn default_extraction_timeout_secs() -> u64 {
    60
}
fn default_embedding_timeout_secs() -> u64 {
    60
}
fn default_synthesis_timeout_secs() -> u64 {
    120
}
fn default_store_timeout_secs() -> u64 {
    30
}
fn default_vision_timeout_secs() -> u64 {
    180
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            extraction_timeout_secs: default_extraction_timeout_secs(),
            embedding_timeout_secs: default_embedding_timeout_secs(),
            synthesis_timeout_secs: default_synthesis_timeout_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            vision_timeout_secs: default_vision_timeout_secs(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_processing_model")]
    pub processing_model: String,
    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub llm_fallbacks: Vec<LlmProviderConfig>,
    #[serde(default)]
    pub tuning: KernelTuning,
    #[serde(default)]
    pub deadlines: DeadlineConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_processing_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_synthesis_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
