//! The error taxonomy shared across the pipeline, per the error handling
//! design: `UsageError`, `DatabaseError`, `ProcessError`, `FetchError`,
//! `NotFoundError`, `TransportError`. Each producing crate defines its own
//! `thiserror` enum; [`JacobineError`] unifies them for the CLI's final
//! exit-code mapping.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown project: {0}")]
    UnknownProject(String),
}

/// Fatal to the call: empty table name, empty value map, bad arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("table name must not be empty")]
    EmptyTable,

    #[error("value map must not be empty")]
    EmptyValues,
}

/// Driver error surfaced after the one-shot reconnect retry has already
/// been attempted (or did not apply).
#[derive(Error, Debug, Clone)]
#[error("database error (code={code:?}): {message}")]
pub struct DatabaseError {
    pub code: Option<String>,
    pub message: String,
}

/// Child process exited non-zero, timed out, or could not be spawned.
#[derive(Error, Debug, Clone)]
#[error("process error running `{command_line}`: {message}")]
pub struct ProcessError {
    pub command_line: String,
    pub message: String,
    pub exit_code: Option<i32>,
}

/// HTTP non-OK, timeout, or post-download checksum mismatch.
#[derive(Error, Debug, Clone)]
#[error("fetch error for {url}: {message}")]
pub struct FetchError {
    pub url: String,
    pub message: String,
}

/// A referenced work-record id is missing from the database.
#[derive(Error, Debug, Clone)]
#[error("record not found: table={table} id={id}")]
pub struct NotFoundError {
    pub table: String,
    pub id: String,
}

/// Broker connection lost; the process is expected to exit and be
/// restarted by an external supervisor.
#[derive(Error, Debug, Clone)]
#[error("broker transport error: {0}")]
pub struct TransportError(pub String);

/// Top-level error used by the CLI's exit-code mapping.
#[derive(Error, Debug)]
pub enum JacobineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Other(String),
}
