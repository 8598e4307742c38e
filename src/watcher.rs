//! Download-and-Detect Watcher: poll a directory until a new, completed file
//! matching a name shows up, or a deadline passes.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::WatchError;
use crate::names::{contains_ignore_case, ends_with_ignore_case};

/// Suffixes browsers give files that are still being written.
pub const PARTIAL_SUFFIXES: &[&str] = &[".crdownload", ".download", ".part", ".partial", ".tmp"];

#[derive(Debug, Clone)]
pub struct WatchSpec {
    /// Case-insensitive substring the file name must contain.
    pub needle: String,
    /// Required trailing file-type suffix, e.g. `.exe`.
    pub suffix: String,
    pub poll: Duration,
    pub max_wait: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Found(PathBuf),
    TimedOut,
}

/// Names present when watching began, plus the deadline.
#[derive(Debug)]
pub struct DownloadWatch {
    dir: PathBuf,
    initial: HashSet<String>,
    deadline: Instant,
}

impl DownloadWatch {
    pub fn begin(dir: &Path, max_wait: Duration) -> Result<Self, WatchError> {
        let initial = list_files(dir).map_err(|source| WatchError::Snapshot { dir: dir.to_path_buf(), source })?;
        debug!("watch {}: {} files in initial snapshot", dir.display(), initial.len());
        Ok(Self { dir: dir.to_path_buf(), initial, deadline: Instant::now() + max_wait })
    }

    pub fn is_partial(name: &str) -> bool {
        PARTIAL_SUFFIXES.iter().any(|s| ends_with_ignore_case(name, s))
    }

    /// First qualifying file that was not in the initial snapshot.
    pub fn check(&self, spec: &WatchSpec) -> io::Result<Option<PathBuf>> {
        let mut names: Vec<String> = list_files(&self.dir)?.into_iter().collect();
        names.sort();
        Ok(names
            .into_iter()
            .filter(|n| !Self::is_partial(n))
            .filter(|n| contains_ignore_case(n, &spec.needle) && ends_with_ignore_case(n, &spec.suffix))
            .find(|n| !self.initial.contains(n))
            .map(|n| self.dir.join(n)))
    }

    /// Poll until found or the deadline passes. Listing errors during
    /// polling are logged and retried.
    pub fn wait(self, spec: &WatchSpec) -> WatchOutcome {
        loop {
            match self.check(spec) {
                Ok(Some(path)) => {
                    info!("Found new download: {}", path.display());
                    return WatchOutcome::Found(path);
                }
                Ok(None) => {}
                Err(e) => warn!("Error scanning {}: {}", self.dir.display(), e),
            }
            let now = Instant::now();
            if now >= self.deadline {
                return WatchOutcome::TimedOut;
            }
            thread::sleep(spec.poll.min(self.deadline - now));
        }
    }
}

/// Snapshot, then wait.
pub fn watch(dir: &Path, spec: &WatchSpec) -> Result<WatchOutcome, WatchError> {
    Ok(DownloadWatch::begin(dir, spec.max_wait)?.wait(spec))
}

fn list_files(dir: &Path) -> io::Result<HashSet<String>> {
    let mut out = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            out.insert(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(out)
}
