use std::path::PathBuf;

/// Failure to obtain an exit code from an external tool.
///
/// `Launch` means the program never ran; a non-zero exit is not an error at
/// this level and is returned as `Ok(code)` by the runner.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited without an exit code")]
    NoExitCode { program: String },
}

impl RunError {
    pub fn did_not_run(&self) -> bool {
        matches!(self, RunError::Launch { .. })
    }
}

/// One failed entry inside a mirror or purge pass.
#[derive(Debug, thiserror::Error)]
#[error("{path}: {source}")]
pub struct FsError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to list {dir}: {source}")]
    Snapshot {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    #[error("cannot locate current executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("ShellExecuteW failed with code {0}")]
    ShellExecute(isize),
    #[error("elevation is only supported on Windows")]
    Unsupported,
}
