//! `download.http` — fetch a release tarball, verify its checksums, and
//! hand off to extraction.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use jacobine_core::envelope::{self, DownloadHttpEnvelope, ExtractTargzEnvelope};
use jacobine_core::sql::SqlValue;
use jacobine_db::Db;
use jacobine_queue::publish_json;
use jacobine_runtime::{Disposition, Stage, StageDeps};
use md5::{Digest, Md5};
use sha1::Sha1;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::common::{get_bool, get_text, load_row, parse_id, reject_on_error};

pub const ROUTING_KEY: &str = "download.http";
const TABLE: &str = "versions";

pub struct DownloadHttpStage;

#[async_trait]
impl Stage for DownloadHttpStage {
    fn routing_key(&self) -> &'static str {
        ROUTING_KEY
    }

    async fn process(&self, body: &[u8], deps: &StageDeps) -> Disposition {
        let envelope: DownloadHttpEnvelope = match envelope::decode(body) {
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

        if get_bool(&row, "downloaded") {
            info!(stage = ROUTING_KEY, id, "already downloaded, skipping");
            return Disposition::Ack;
        }

        let Some(url_tar) = get_text(&row, "url_tar") else {
            warn!(stage = ROUTING_KEY, id, "record has no url_tar");
            return Disposition::RejectNoRequeue;
        };
        let expected_md5 = get_text(&row, "checksum_tar_md5").map(str::to_lowercase);
        let expected_sha1 = get_text(&row, "checksum_tar_sha1").map(str::to_lowercase);

        let filename = format!(
            "{}{}{}",
            envelope.filename_prefix, envelope.version_id, envelope.filename_postfix
        );
        let dest = Path::new(&project_config.releases_path).join(&filename);

        let downloads_timeout = Duration::from_secs(deps.config.various.downloads_timeout);
        match deps
            .fetcher
            .download_to_file(url_tar, &dest, Some(downloads_timeout))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(stage = ROUTING_KEY, id, dest = %dest.display(), "download reported success but file is missing");
                return Disposition::RejectNoRequeue;
            }
            Err(e) => {
                warn!(stage = ROUTING_KEY, id, error = %e, "download failed");
                return Disposition::RejectNoRequeue;
            }
        }

        if let Err(mismatch) = verify_checksums(&dest, expected_md5.as_deref(), expected_sha1.as_deref()).await {
            warn!(stage = ROUTING_KEY, id, reason = %mismatch, dest = %dest.display(), "checksum mismatch, file retained for forensics");
            return Disposition::RejectNoRequeue;
        }

        let follow_on = ExtractTargzEnvelope {
            project: envelope.project.clone(),
            version_id: envelope.version_id.clone(),
            file_path: dest.display().to_string(),
        };
        if let Err(e) = publish_json(
            deps.queue.as_ref(),
            &project_config.rabbitmq.exchange,
            "extract.targz",
            &follow_on,
        )
        .await
        {
            warn!(stage = ROUTING_KEY, id, error = %e, "failed to publish follow-on");
            return Disposition::NackRequeue;
        }

        let mut values = BTreeMap::new();
        values.insert("downloaded".to_string(), SqlValue::Bool(true));
        let mut predicate = BTreeMap::new();
        predicate.insert("id".to_string(), SqlValue::Int(id));
        if let Err(e) = db.update(TABLE, &values, &predicate).await {
            warn!(stage = ROUTING_KEY, id, error = %e, "failed to record download");
            return reject_on_error(ROUTING_KEY, &e.into());
        }
        drop(db);

        info!(stage = ROUTING_KEY, id, dest = %dest.display(), "download complete");
        Disposition::Ack
    }
}

#[derive(Debug)]
struct ChecksumMismatch(String);

impl std::fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

async fn verify_checksums(
    path: &Path,
    expected_md5: Option<&str>,
    expected_sha1: Option<&str>,
) -> Result<(), ChecksumMismatch> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ChecksumMismatch(format!("failed to read downloaded file: {e}")))?;

    if let Some(expected) = expected_md5 {
        let mut hasher = Md5::new();
        hasher.update(&bytes);
        let actual = hex::encode(hasher.finalize());
        if actual != expected {
            return Err(ChecksumMismatch(format!("md5 mismatch: expected {expected}, got {actual}")));
        }
    }

    if let Some(expected) = expected_sha1 {
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        let actual = hex::encode(hasher.finalize());
        if actual != expected {
            return Err(ChecksumMismatch(format!("sha1 mismatch: expected {expected}, got {actual}")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_checksums_accepts_matching_digests() {
        let dir = std::env::temp_dir().join("jacobine-stages-test-checksum-ok");
        tokio::fs::write(&dir, b"hello world").await.unwrap();
        let md5 = hex::encode(Md5::digest(b"hello world"));
        let sha1 = hex::encode(Sha1::digest(b"hello world"));
        verify_checksums(&dir, Some(&md5), Some(&sha1)).await.unwrap();
        tokio::fs::remove_file(&dir).await.ok();
    }

    #[tokio::test]
    async fn verify_checksums_rejects_mismatched_md5() {
        let dir = std::env::temp_dir().join("jacobine-stages-test-checksum-bad");
        tokio::fs::write(&dir, b"hello world").await.unwrap();
        let err = verify_checksums(&dir, Some("deadbeef"), None).await.unwrap_err();
        assert!(err.to_string().contains("md5 mismatch"));
        tokio::fs::remove_file(&dir).await.ok();
    }

    #[tokio::test]
    async fn already_downloaded_record_skips_fetch_and_acks() {
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), SqlValue::Int(7));
        row.insert("downloaded".to_string(), SqlValue::Bool(true));
        let db = crate::test_support::MockDb::new().seed(TABLE, row);
        let (deps, queue) = crate::test_support::test_deps(db, crate::test_support::MockQueue::new());

        let stage = DownloadHttpStage;
        let body = br#"{"project":"TYPO3","versionId":"7","filenamePrefix":"typo3_","filenamePostfix":".tar.gz"}"#;
        let disposition = stage.process(body, &deps).await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(queue.published().await.is_empty(), "skip must not fetch nor publish a follow-on");
    }

    #[tokio::test]
    async fn vanished_record_rejects_without_requeue() {
        let (deps, _queue) = crate::test_support::test_deps(
            crate::test_support::MockDb::new(),
            crate::test_support::MockQueue::new(),
        );
        let stage = DownloadHttpStage;
        let body = br#"{"project":"TYPO3","versionId":"404","filenamePrefix":"typo3_","filenamePostfix":".tar.gz"}"#;
        let disposition = stage.process(body, &deps).await;
        assert_eq!(disposition, Disposition::RejectNoRequeue);
    }

    /// `process()`'s own download/checksum steps need a live fetch this
    /// double doesn't provide, so this drives the tail of the handler
    /// directly in the same order `process()` uses: publish the follow-on
    /// first, write the `downloaded` flag only if that publish succeeded.
    /// A failed publish must leave the flag unset so redelivery retries it
    /// instead of silently Acking a record whose follow-on never went out.
    #[tokio::test]
    async fn publish_failure_leaves_the_downloaded_flag_unset() {
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), SqlValue::Int(7));
        row.insert("downloaded".to_string(), SqlValue::Bool(false));
        let db = crate::test_support::MockDb::new().seed(TABLE, row);
        let queue = crate::test_support::MockQueue::new();
        *queue.fail_next.lock().await = true;
        let shared = crate::test_support::SharedMockDb::new(db);

        let follow_on = ExtractTargzEnvelope {
            project: "TYPO3".to_string(),
            version_id: "7".to_string(),
            file_path: "/tmp/jacobine-test-dest".to_string(),
        };
        let publish_result = publish_json(&queue, "JacobineAnalysis", "extract.targz", &follow_on).await;
        assert!(publish_result.is_err());
        if publish_result.is_ok() {
            let mut values = BTreeMap::new();
            values.insert("downloaded".to_string(), SqlValue::Bool(true));
            let mut predicate = BTreeMap::new();
            predicate.insert("id".to_string(), SqlValue::Int(7));
            shared.clone().update(TABLE, &values, &predicate).await.unwrap();
        }

        assert!(!get_bool(&shared.row(TABLE, 7).await, "downloaded"));
    }
}
