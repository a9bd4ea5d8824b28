//! Producer (C7): a one-shot job, not a consumer. Fetches a project's
//! upstream release feed, upserts `versions` rows, and (re)publishes
//! `download.http` messages for anything not yet downloaded.

use std::collections::BTreeMap;

use jacobine_core::config::{Config, ProjectConfig};
use jacobine_core::error::{ConfigError, FetchError, TransportError};
use jacobine_core::sql::SqlValue;
use jacobine_db::{DbGateway, UsageOrDatabaseError};
use jacobine_fetch::HttpFetcher;
use jacobine_queue::QueueClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const TABLE: &str = "versions";
const ROUTING_KEY: &str = "download.http";

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("project has no configured feed URL")]
    MissingFeedUrl,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to parse upstream feed: {0}")]
    Decode(String),

    #[error(transparent)]
    Database(#[from] UsageOrDatabaseError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProducerOutcome {
    pub inserted: u32,
    pub republished: u32,
    pub skipped: u32,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    version: String,
    url: ReleaseUrls,
    checksums: ReleaseChecksums,
}

#[derive(Debug, Deserialize)]
struct ReleaseUrls {
    tar: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    zip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseChecksums {
    tar: Option<ChecksumPair>,
    #[serde(default)]
    #[allow(dead_code)]
    zip: Option<ChecksumPair>,
}

#[derive(Debug, Deserialize)]
struct ChecksumPair {
    md5: Option<String>,
    sha1: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadHttpMessage<'a> {
    project: &'a str,
    #[serde(rename = "versionId")]
    version_id: &'a str,
    #[serde(rename = "filenamePrefix")]
    filename_prefix: &'a str,
    #[serde(rename = "filenamePostfix")]
    filename_postfix: &'a str,
}

/// Recognise branch entries by shape, not by name: a value with a
/// non-empty `releases` array is a branch; bookkeeping scalars like
/// `latest_stable` simply don't have one and are skipped.
fn releases_to_process(feed: &serde_json::Value) -> Vec<ReleaseEntry> {
    let Some(branches) = feed.as_object() else {
        return Vec::new();
    };

    let mut releases = Vec::new();
    for branch in branches.values() {
        let Some(entries) = branch.get("releases").and_then(serde_json::Value::as_array) else {
            continue;
        };
        for entry in entries {
            match serde_json::from_value::<ReleaseEntry>(entry.clone()) {
                Ok(parsed) => releases.push(parsed),
                Err(e) => debug!(error = %e, "skipping malformed release entry"),
            }
        }
    }
    releases
}

fn is_snapshot(release: &ReleaseEntry) -> bool {
    release
        .url
        .tar
        .as_deref()
        .is_some_and(|url| url.contains("snapshot"))
}

fn filename_parts<'a>(project_config: &'a ProjectConfig) -> (&'a str, &'a str) {
    let stage = project_config.consumer.get("DownloadHttp");
    let prefix = stage
        .and_then(|s| s.get("filenamePrefix"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let postfix = stage
        .and_then(|s| s.get("filenamePostfix"))
        .and_then(|v| v.as_str())
        .unwrap_or(".tar.gz");
    (prefix, postfix)
}

/// Run the producer for one project: fetch the feed, upsert rows, publish
/// `download.http` for anything not yet downloaded.
pub async fn run(
    config: &Config,
    project: &str,
    db: &mut DbGateway,
    queue: &QueueClient,
    fetcher: &HttpFetcher,
) -> Result<ProducerOutcome, ProducerError> {
    let project_config = config.project(project)?;
    let feed_url = project_config
        .consumer
        .get("Producer")
        .and_then(|s| s.get("feedUrl"))
        .and_then(|v| v.as_str())
        .ok_or(ProducerError::MissingFeedUrl)?;

    let timeout = std::time::Duration::from_secs(config.various.requests_timeout);
    let response = fetcher.get(feed_url, timeout).await?;
    let feed: serde_json::Value =
        serde_json::from_slice(&response.body).map_err(|e| ProducerError::Decode(e.to_string()))?;

    let (filename_prefix, filename_postfix) = filename_parts(project_config);
    let mut outcome = ProducerOutcome::default();

    for release in releases_to_process(&feed) {
        if is_snapshot(&release) {
            outcome.skipped += 1;
            continue;
        }
        let Some(url_tar) = &release.url.tar else {
            outcome.skipped += 1;
            continue;
        };

        let mut predicate = BTreeMap::new();
        predicate.insert("version".to_string(), SqlValue::Text(release.version.clone()));
        let existing = db.select(TABLE, &predicate, None, None, Some(1)).await?;

        let version_id = if let Some(row) = existing.first() {
            let already_downloaded = matches!(row.get("downloaded"), Some(SqlValue::Bool(true)) | Some(SqlValue::Int(1)));
            if already_downloaded {
                outcome.skipped += 1;
                continue;
            }
            match row.get("id") {
                Some(SqlValue::Int(id)) => id.to_string(),
                Some(SqlValue::Text(id)) => id.clone(),
                _ => continue,
            }
        } else {
            let mut values = BTreeMap::new();
            values.insert("version".to_string(), SqlValue::Text(release.version.clone()));
            values.insert("url_tar".to_string(), SqlValue::Text(url_tar.clone()));
            values.insert(
                "checksum_tar_md5".to_string(),
                release
                    .checksums
                    .tar
                    .as_ref()
                    .and_then(|c| c.md5.clone())
                    .map(SqlValue::Text)
                    .unwrap_or(SqlValue::Null),
            );
            values.insert(
                "checksum_tar_sha1".to_string(),
                release
                    .checksums
                    .tar
                    .as_ref()
                    .and_then(|c| c.sha1.clone())
                    .map(SqlValue::Text)
                    .unwrap_or(SqlValue::Null),
            );
            values.insert("downloaded".to_string(), SqlValue::Bool(false));
            let id = db.insert(TABLE, &values).await?;
            outcome.inserted += 1;
            id
        };

        let message = DownloadHttpMessage {
            project,
            version_id: &version_id,
            filename_prefix,
            filename_postfix,
        };
        queue
            .publish(&project_config.rabbitmq.exchange, ROUTING_KEY, &message)
            .await?;
        outcome.republished += 1;

        info!(project, version = %release.version, version_id, "published download.http");
    }

    Ok(outcome)
}
