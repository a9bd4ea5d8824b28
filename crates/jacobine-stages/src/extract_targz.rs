//! `extract.targz` — unpack a downloaded release archive and fan out one
//! analysis message per analyzer configured for the project.

use std::path::Path;

use async_trait::async_trait;
use jacobine_core::envelope::{self, AnalysisEnvelope, ExtractTargzEnvelope};
use jacobine_core::sql::SqlValue;
use jacobine_db::Db;
use jacobine_process::ProcessRunner;
use jacobine_queue::publish_json;
use jacobine_runtime::{Disposition, Stage, StageDeps};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::common::{get_bool, load_row, parse_id, reject_on_error};

pub const ROUTING_KEY: &str = "extract.targz";
const TABLE: &str = "versions";

pub struct ExtractTargzStage;

#[async_trait]
impl Stage for ExtractTargzStage {
    fn routing_key(&self) -> &'static str {
        ROUTING_KEY
    }

    async fn process(&self, body: &[u8], deps: &StageDeps) -> Disposition {
        let envelope: ExtractTargzEnvelope = match envelope::decode(body) {
            Ok(e) => e,
            Err(e) => {
                warn!(stage = ROUTING_KEY, error = %e, "malformed envelope");
                return Disposition::RejectNoRequeue;
            }
        };

        let Some(id) = parse_id(&envelope.version_id) else {
            warn!(stage = ROUTING_KEY, version_id = %envelope.version_id, "non-numeric versionId");
            return Disposition::RejectNoRequeue;
        };

        let project_config = match deps.project_config() {
            Ok(c) => c,
            Err(e) => {
                warn!(stage = ROUTING_KEY, error = %e, "unknown project");
                return Disposition::RejectNoRequeue;
            }
        };

        let mut db = deps.db.lock().await;
        let row = match load_row(&mut db, TABLE, id).await {
            Ok(r) => r,
            Err(e) => return reject_on_error(ROUTING_KEY, &e),
        };

        if get_bool(&row, "extracted") {
            info!(stage = ROUTING_KEY, id, "already extracted, skipping");
            return Disposition::Ack;
        }

        let extract_dir = Path::new(&project_config.releases_path)
            .join("extracted")
            .join(&envelope.version_id);
        if let Err(e) = tokio::fs::create_dir_all(&extract_dir).await {
            warn!(stage = ROUTING_KEY, id, error = %e, "failed to create extract directory");
            return Disposition::RejectNoRequeue;
        }

        let tool = deps.config.application.get("tar");
        let binary = tool.map(|t| t.path.as_str()).unwrap_or("tar");
        let timeout = tool
            .and_then(|t| t.timeout)
            .map(Duration::from_secs);
        let args = vec![
            "-xzf".to_string(),
            envelope.file_path.clone(),
            "-C".to_string(),
            extract_dir.display().to_string(),
        ];

        match ProcessRunner::run(binary, &args, None, timeout).await {
            Ok(output) if output.successful => {}
            Ok(output) => {
                warn!(stage = ROUTING_KEY, id, exit_code = ?output.exit_code, stderr = %output.stderr, "tar exited non-zero");
                return Disposition::RejectNoRequeue;
            }
            Err(e) => {
                warn!(stage = ROUTING_KEY, id, error = %e, "tar failed to run");
                return Disposition::RejectNoRequeue;
            }
        }

        for analyzer in &project_config.analyzers {
            let follow_on = AnalysisEnvelope {
                project: envelope.project.clone(),
                record_id: envelope.version_id.clone(),
                source_dir: extract_dir.display().to_string(),
            };
            if let Err(e) = publish_json(
                deps.queue.as_ref(),
                &project_config.rabbitmq.exchange,
                analyzer,
                &follow_on,
            )
            .await
            {
                warn!(stage = ROUTING_KEY, id, analyzer, error = %e, "failed to publish follow-on");
                return Disposition::NackRequeue;
            }
        }

        let mut values = BTreeMap::new();
        values.insert("extracted".to_string(), SqlValue::Bool(true));
        values.insert(
            "extracted_path".to_string(),
            SqlValue::Text(extract_dir.display().to_string()),
        );
        let mut predicate = BTreeMap::new();
        predicate.insert("id".to_string(), SqlValue::Int(id));
        if let Err(e) = db.update(TABLE, &values, &predicate).await {
            warn!(stage = ROUTING_KEY, id, error = %e, "failed to record extraction");
            return reject_on_error(ROUTING_KEY, &e.into());
        }
        drop(db);

        info!(stage = ROUTING_KEY, id, extract_dir = %extract_dir.display(), "extraction complete");
        Disposition::Ack
    }
}
