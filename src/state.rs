use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::SendPipeline;
use crate::stats::StatsReporter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<SendPipeline>,
    pub stats: Arc<StatsReporter>,
}

impl AppState {
    pub fn new(config: Config, pipeline: SendPipeline) -> Self {
        let stats = StatsReporter::new(pipeline.rate_limiter().clone());

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            stats: Arc::new(stats),
        }
    }
}
