//! `download.git` — clone or fast-forward a project's git checkout, then
//! hand off to CVSAnaly, the only analyzer that needs full commit history
//! rather than a tarball snapshot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use jacobine_core::envelope::{self, CvsAnalyEnvelope, DownloadGitEnvelope};
use jacobine_process::ProcessRunner;
use jacobine_queue::publish_json;
use jacobine_runtime::{Disposition, Stage, StageDeps};
use tracing::{info, warn};

use crate::common::{get_text, load_row, parse_id, reject_on_error};

pub const ROUTING_KEY: &str = "download.git";
const TABLE: &str = "gitweb";
const FOLLOW_ON_ROUTING_KEY: &str = "analysis.cvsanaly";

pub struct DownloadGitStage;

#[async_trait]
impl Stage for DownloadGitStage {
    fn routing_key(&self) -> &'static str {
        ROUTING_KEY
    }

    async fn process(&self, body: &[u8], deps: &StageDeps) -> Disposition {
        let envelope: DownloadGitEnvelope = match envelope::decode(body) {
            Ok(e) => e,
            Err(e) => {
                warn!(stage = ROUTING_KEY, error = %e, "malformed envelope");
                return Disposition::RejectNoRequeue;
            }
        };

        let Some(id) = parse_id(&envelope.gitweb_id) else {
            warn!(stage = ROUTING_KEY, gitweb_id = %envelope.gitweb_id, "non-numeric gitwebId");
            return Disposition::RejectNoRequeue;
        };

        let project_config = match deps.project_config() {
            Ok(c) => c,
            Err(e) => {
                warn!(stage = ROUTING_KEY, error = %e, "unknown project");
                return Disposition::RejectNoRequeue;
            }
        };

        let row = {
            let mut db = deps.db.lock().await;
            match load_row(&mut db, TABLE, id).await {
                Ok(r) => r,
                Err(e) => return reject_on_error(ROUTING_KEY, &e),
            }
        };

        let Some(repo_name) = get_text(&row, "repo_name") else {
            warn!(stage = ROUTING_KEY, id, "record has no repo_name");
            return Disposition::RejectNoRequeue;
        };
        let Some(url) = get_text(&row, "url") else {
            warn!(stage = ROUTING_KEY, id, "record has no url");
            return Disposition::RejectNoRequeue;
        };

        let checkout_dir = Path::new(&project_config.git_checkout_path)
            .join(&envelope.project)
            .join("git")
            .join(normalize_repo_name(repo_name));

        let tool = deps.config.application.get("git");
        let binary = tool.map(|t| t.path.as_str()).unwrap_or("git");
        let timeout = tool.and_then(|t| t.timeout).map(Duration::from_secs);

        if matches!(tokio::fs::try_exists(checkout_dir.join(".git")).await, Ok(true)) {
            if let Err(d) = pull(binary, &checkout_dir, timeout).await {
                return d;
            }
        } else if let Err(d) = clone(binary, url, &checkout_dir, timeout).await {
            return d;
        }

        let follow_on = CvsAnalyEnvelope {
            project: envelope.project.clone(),
            gitweb_id: envelope.gitweb_id.clone(),
            checkout_dir: checkout_dir.display().to_string(),
        };
        if let Err(e) = publish_json(
            deps.queue.as_ref(),
            &project_config.rabbitmq.exchange,
            FOLLOW_ON_ROUTING_KEY,
            &follow_on,
        )
        .await
        {
            warn!(stage = ROUTING_KEY, id, error = %e, "failed to publish follow-on");
            return Disposition::NackRequeue;
        }

        info!(stage = ROUTING_KEY, id, checkout_dir = %checkout_dir.display(), "checkout up to date");
        Disposition::Ack
    }
}

/// `/`→`_`, strip a trailing `.git`, then `.`→`-`.
fn normalize_repo_name(repo_name: &str) -> String {
    let stripped = repo_name.strip_suffix(".git").unwrap_or(repo_name);
    stripped.replace('/', "_").replace('.', "-")
}

/// Guarded by a `git branch` probe: only pull if a local `master` exists.
async fn pull(binary: &str, dir: &Path, timeout: Option<Duration>) -> Result<(), Disposition> {
    let branch_output = ProcessRunner::run(binary, &["branch".to_string()], Some(dir), timeout)
        .await
        .map_err(|e| {
            warn!(stage = ROUTING_KEY, error = %e, "git branch failed to run");
            Disposition::RejectNoRequeue
        })?;

    let has_master = branch_output
        .stdout
        .lines()
        .any(|line| line.trim_start_matches('*').trim() == "master");

    if !has_master {
        warn!(stage = ROUTING_KEY, dir = %dir.display(), "no local master branch, refusing to pull");
        return Err(Disposition::RejectNoRequeue);
    }

    let pull_output = ProcessRunner::run(binary, &["pull".to_string()], Some(dir), timeout)
        .await
        .map_err(|e| {
            warn!(stage = ROUTING_KEY, error = %e, "git pull failed to run");
            Disposition::RejectNoRequeue
        })?;

    if !pull_output.successful {
        warn!(stage = ROUTING_KEY, dir = %dir.display(), stderr = %pull_output.stderr, "git pull exited non-zero");
        return Err(Disposition::RejectNoRequeue);
    }

    Ok(())
}

async fn clone(binary: &str, url: &str, dir: &Path, timeout: Option<Duration>) -> Result<(), Disposition> {
    let parent: PathBuf = dir.parent().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
    if let Err(e) = tokio::fs::create_dir_all(&parent).await {
        warn!(stage = ROUTING_KEY, error = %e, "mkdir -p failed");
        return Err(Disposition::RejectNoRequeue);
    }

    let args = vec![
        "clone".to_string(),
        "--recursive".to_string(),
        url.to_string(),
        dir.display().to_string(),
    ];
    match ProcessRunner::run(binary, &args, None, timeout).await {
        Ok(output) if output.successful => Ok(()),
        Ok(output) => {
            warn!(stage = ROUTING_KEY, dir = %dir.display(), stderr = %output.stderr, "git clone exited non-zero");
            Err(Disposition::RejectNoRequeue)
        }
        Err(e) => {
            warn!(stage = ROUTING_KEY, error = %e, "git clone failed to run");
            Err(Disposition::RejectNoRequeue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_git_suffix_and_replaces_separators() {
        assert_eq!(normalize_repo_name("typo3/typo3-cms.git"), "typo3_typo3-cms");
    }

    #[test]
    fn collapses_dots_after_slashes() {
        assert_eq!(normalize_repo_name("org.name/sub.repo"), "org-name_sub-repo");
    }

    #[test]
    fn leaves_plain_names_untouched() {
        assert_eq!(normalize_repo_name("core"), "core");
    }

    #[tokio::test]
    async fn vanished_record_rejects_without_requeue() {
        let (deps, _queue) = crate::test_support::test_deps(
            crate::test_support::MockDb::new(),
            crate::test_support::MockQueue::new(),
        );
        let stage = DownloadGitStage;
        let body = br#"{"project":"TYPO3","gitwebId":"404"}"#;
        let disposition = stage.process(body, &deps).await;
        assert_eq!(disposition, Disposition::RejectNoRequeue);
    }

    #[tokio::test]
    async fn malformed_envelope_rejects_without_requeue() {
        let (deps, _queue) = crate::test_support::test_deps(
            crate::test_support::MockDb::new(),
            crate::test_support::MockQueue::new(),
        );
        let stage = DownloadGitStage;
        let disposition = stage.process(b"not json", &deps).await;
        assert_eq!(disposition, Disposition::RejectNoRequeue);
    }
}
