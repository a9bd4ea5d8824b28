//! Everything a [`crate::Stage`] needs to do its work, bundled so the
//! runtime can build it once per consumer process and hand out `&StageDeps`
//! to every `process()` call.

use std::sync::Arc;

use jacobine_core::config::{Config, ProjectConfig};
use jacobine_core::error::ConfigError;
use jacobine_db::Db;
use jacobine_fetch::HttpFetcher;
use jacobine_queue::Queue;
use tokio::sync::Mutex;

pub struct StageDeps {
    /// One connection per consumer process; stages serialize on it.
    pub db: Mutex<Box<dyn Db>>,
    pub queue: Arc<dyn Queue>,
    pub fetcher: Arc<HttpFetcher>,
    pub config: Arc<Config>,
    pub project: String,
}

impl StageDeps {
    pub fn new(
        db: Box<dyn Db>,
        queue: Arc<dyn Queue>,
        fetcher: Arc<HttpFetcher>,
        config: Arc<Config>,
        project: String,
    ) -> Self {
        Self {
            db: Mutex::new(db),
            queue,
            fetcher,
            config,
            project,
        }
    }

    pub fn project_config(&self) -> Result<&ProjectConfig, ConfigError> {
        self.config.project(&self.project)
    }
}
