use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::activity::ActivityLog;
use crate::config::{Config, LlmProviderKind};
use crate::pipeline::Pipeline;

/// Everything handlers share: the pipeline plus the shell's own bookkeeping
#[derive(Debug)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub activity: ActivityLog,
    pub api_token: Option<String>,
    pub uploads_dir: PathBuf,
    pub llm_provider: LlmProviderKind,
    pub available_llms: Vec<LlmProviderKind>,
    /// Whether the selected LLM has the credentials it needs
    pub llm_configured: bool,
    pub started_at: Instant,
}

impl AppState {
    #[inline]
    pub fn new(config: &Config, pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            activity: ActivityLog::new(config.history.max_queries, config.history.max_feedback),
            api_token: config.server.api_token.clone(),
            uploads_dir: config.uploads_path(),
            llm_provider: config.providers.llm,
            available_llms: config.available_llm_providers(),
            llm_configured: config.validate_credentials().is_ok(),
            started_at: Instant::now(),
        }
    }
}
