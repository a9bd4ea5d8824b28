//! Argument grammar for the `jacobine` dispatcher. Kept separate from
//! `main` per the teacher's `cli.rs`/`main.rs` split.

use clap::{Parser, Subcommand, ValueEnum};

use jacobine_stages::StageName;

#[derive(Parser, Debug)]
#[command(name = "jacobine", about = "Project release pipeline dispatcher")]
pub struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, default_value = "config.yml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a project's release feed and publish `download.http` for
    /// anything not yet downloaded.
    Produce { project: String },
    /// Run a single consumer bound to one stage's queue.
    Consume {
        project: String,
        #[arg(value_enum)]
        stage: StageArg,
    },
}

/// `clap`-facing mirror of [`StageName`] — `jacobine_stages` stays free of
/// a `clap` dependency, so the CLI owns the `ValueEnum` derive.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StageArg {
    DownloadHttp,
    DownloadGit,
    ExtractTargz,
    AnalysisCvsAnaly,
    AnalysisPhpLoc,
    AnalysisPDepend,
    AnalysisGithubLinguist,
}

impl From<StageArg> for StageName {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::DownloadHttp => StageName::DownloadHttp,
            StageArg::DownloadGit => StageName::DownloadGit,
            StageArg::ExtractTargz => StageName::ExtractTargz,
            StageArg::AnalysisCvsAnaly => StageName::AnalysisCvsAnaly,
            StageArg::AnalysisPhpLoc => StageName::AnalysisPhpLoc,
            StageArg::AnalysisPDepend => StageName::AnalysisPDepend,
            StageArg::AnalysisGithubLinguist => StageName::AnalysisGithubLinguist,
        }
    }
}
