//! `analysis.*` — spawn the configured static-analysis tool against a
//! stage's input directory and persist its raw output keyed by the work
//! record id. Parsing each tool's specific output format is out of scope
//! (spec §1: concrete analysis tool internals are opaque subprocesses);
//! what every analyzer shares is spawn → write metrics row → ack.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use jacobine_core::envelope::{self, AnalysisEnvelope};
use jacobine_core::sql::SqlValue;
use jacobine_db::Db;
use jacobine_process::ProcessRunner;
use jacobine_runtime::{Disposition, Stage, StageDeps};
use tracing::{info, warn};

/// The fixed shape every analyzer shares: a routing key, the `Application`
/// config key for its binary, and the table its metrics row lands in.
pub struct AnalysisProfile {
    pub routing_key: &'static str,
    pub application_key: &'static str,
    pub metrics_table: &'static str,
}

pub const CVSANALY: AnalysisProfile = AnalysisProfile {
    routing_key: "analysis.cvsanaly",
    application_key: "cvsanaly",
    metrics_table: "analysis_cvsanaly",
};

pub const PHPLOC: AnalysisProfile = AnalysisProfile {
    routing_key: "analysis.phploc",
    application_key: "phploc",
    metrics_table: "analysis_phploc",
};

pub const PDEPEND: AnalysisProfile = AnalysisProfile {
    routing_key: "analysis.pdepend",
    application_key: "pdepend",
    metrics_table: "analysis_pdepend",
};

pub const GITHUB_LINGUIST: AnalysisProfile = AnalysisProfile {
    routing_key: "analysis.github.linguist",
    application_key: "github-linguist",
    metrics_table: "analysis_github_linguist",
};

pub struct AnalysisStage {
    profile: &'static AnalysisProfile,
}

impl AnalysisStage {
    pub const fn new(profile: &'static AnalysisProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl Stage for AnalysisStage {
    fn routing_key(&self) -> &'static str {
        self.profile.routing_key
    }

    async fn process(&self, body: &[u8], deps: &StageDeps) -> Disposition {
        let envelope: AnalysisEnvelope = match envelope::decode(body) {
            Ok(e) => e,
            Err(e) => {
                warn!(stage = self.profile.routing_key, error = %e, "malformed envelope");
                return Disposition::RejectNoRequeue;
            }
        };

        let mut db = deps.db.lock().await;
        let mut existing = BTreeMap::new();
        existing.insert("record_id".to_string(), SqlValue::Text(envelope.record_id.clone()));
        match db.select(self.profile.metrics_table, &existing, None, None, Some(1)).await {
            Ok(rows) if !rows.is_empty() => {
                info!(stage = self.profile.routing_key, record_id = %envelope.record_id, "already analyzed, skipping");
                return Disposition::Ack;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(stage = self.profile.routing_key, record_id = %envelope.record_id, error = %e, "failed to check for existing metrics row");
                return Disposition::RejectNoRequeue;
            }
        }
        drop(db);

        let tool = deps.config.application.get(self.profile.application_key);
        let Some(tool) = tool else {
            warn!(
                stage = self.profile.routing_key,
                application_key = self.profile.application_key,
                "no Application config for this analyzer"
            );
            return Disposition::RejectNoRequeue;
        };

        let mut args = vec![envelope.source_dir.clone()];
        if let Some(pattern) = &tool.file_pattern {
            args.push(pattern.clone());
        }
        let timeout = tool.timeout.map(Duration::from_secs);

        let output = match ProcessRunner::run(&tool.path, &args, None, timeout).await {
            Ok(output) if output.successful => output,
            Ok(output) => {
                warn!(
                    stage = self.profile.routing_key,
                    record_id = %envelope.record_id,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr,
                    "analyzer exited non-zero"
                );
                return Disposition::RejectNoRequeue;
            }
            Err(e) => {
                warn!(stage = self.profile.routing_key, record_id = %envelope.record_id, error = %e, "analyzer failed to run");
                return Disposition::RejectNoRequeue;
            }
        };

        let mut values = BTreeMap::new();
        values.insert("record_id".to_string(), SqlValue::Text(envelope.record_id.clone()));
        values.insert("raw_output".to_string(), SqlValue::Text(output.stdout));

        let mut db = deps.db.lock().await;
        if let Err(e) = db.insert(self.profile.metrics_table, &values).await {
            warn!(stage = self.profile.routing_key, record_id = %envelope.record_id, error = %e, "failed to persist metrics");
            return Disposition::RejectNoRequeue;
        }

        info!(stage = self.profile.routing_key, record_id = %envelope.record_id, "analysis complete");
        Disposition::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_have_distinct_routing_keys() {
        let keys = [
            CVSANALY.routing_key,
            PHPLOC.routing_key,
            PDEPEND.routing_key,
            GITHUB_LINGUIST.routing_key,
        ];
        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn stage_reports_its_profiles_routing_key() {
        let stage = AnalysisStage::new(&PHPLOC);
        assert_eq!(Stage::routing_key(&stage), "analysis.phploc");
    }

    #[tokio::test]
    async fn malformed_envelope_rejects_without_requeue() {
        let (deps, _queue) = crate::test_support::test_deps(
            crate::test_support::MockDb::new(),
            crate::test_support::MockQueue::new(),
        );
        let stage = AnalysisStage::new(&PHPLOC);
        let disposition = stage.process(b"not json", &deps).await;
        assert_eq!(disposition, Disposition::RejectNoRequeue);
    }

    #[tokio::test]
    async fn already_analyzed_record_skips_the_tool_and_acks() {
        let mut row = BTreeMap::new();
        row.insert("record_id".to_string(), SqlValue::Text("42".to_string()));
        row.insert("raw_output".to_string(), SqlValue::Text("previous run".to_string()));
        let db = crate::test_support::MockDb::new().seed(PHPLOC.metrics_table, row);
        let (deps, _queue) = crate::test_support::test_deps(db, crate::test_support::MockQueue::new());

        let stage = AnalysisStage::new(&PHPLOC);
        let body = br#"{"project":"TYPO3","recordId":"42","sourceDir":"/tmp/jacobine-test-src"}"#;
        let disposition = stage.process(body, &deps).await;
        assert_eq!(disposition, Disposition::Ack);
    }
}
