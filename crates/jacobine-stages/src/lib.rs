//! Stage Consumers (C6): one [`jacobine_runtime::Stage`] impl per routing
//! key — the pipeline's edges.

mod analysis;
mod common;
mod download_git;
mod download_http;
mod extract_targz;
#[cfg(test)]
pub(crate) mod test_support;

pub use analysis::{AnalysisProfile, AnalysisStage, CVSANALY, GITHUB_LINGUIST, PDEPEND, PHPLOC};
pub use download_git::DownloadGitStage;
pub use download_http::DownloadHttpStage;
pub use extract_targz::ExtractTargzStage;

use std::sync::Arc;

use jacobine_runtime::Stage;

/// Every stage, named the way the CLI's `StageName` enum names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    DownloadHttp,
    DownloadGit,
    ExtractTargz,
    AnalysisCvsAnaly,
    AnalysisPhpLoc,
    AnalysisPDepend,
    AnalysisGithubLinguist,
}

impl StageName {
    pub fn build(self) -> Arc<dyn Stage> {
        match self {
            StageName::DownloadHttp => Arc::new(DownloadHttpStage),
            StageName::DownloadGit => Arc::new(DownloadGitStage),
            StageName::ExtractTargz => Arc::new(ExtractTargzStage),
            StageName::AnalysisCvsAnaly => Arc::new(AnalysisStage::new(&CVSANALY)),
            StageName::AnalysisPhpLoc => Arc::new(AnalysisStage::new(&PHPLOC)),
            StageName::AnalysisPDepend => Arc::new(AnalysisStage::new(&PDEPEND)),
            StageName::AnalysisGithubLinguist => Arc::new(AnalysisStage::new(&GITHUB_LINGUIST)),
        }
    }
}
