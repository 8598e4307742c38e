//! Download a URL to a local file.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::FetchError;

pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// HTTP(S) download through `ureq`. The body is streamed to `<dest>.part`
/// and renamed into place once complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        info!("Downloading {} -> {}", url, dest.display());
        let response = ureq::get(url)
            .set("user-agent", concat!("zenith-fixer/", env!("CARGO_PKG_VERSION")))
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => FetchError::Status { url: url.to_string(), status },
                other => FetchError::Request { url: url.to_string(), message: other.to_string() },
            })?;
        let status = response.status();
        if status != 200 {
            return Err(FetchError::Status { url: url.to_string(), status });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(write_err(parent))?;
        }
        let partial = partial_path(dest);
        let mut file = File::create(&partial).map_err(write_err(&partial))?;
        let bytes = io::copy(&mut response.into_reader(), &mut file).map_err(write_err(&partial))?;
        drop(file);
        fs::rename(&partial, dest).map_err(write_err(dest))?;
        debug!("downloaded {} bytes to {}", bytes, dest.display());
        Ok(bytes)
    }
}

fn write_err(path: &Path) -> impl FnOnce(io::Error) -> FetchError {
    let path = path.to_path_buf();
    move |source| FetchError::Write { path, source }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/t/vc_redist.x64.exe")),
            PathBuf::from("/t/vc_redist.x64.exe.part")
        );
    }

    #[test]
    fn unreachable_host_is_a_request_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("x.exe");
        let err = HttpFetcher.fetch("http://127.0.0.1:9/none", &dest).unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
        assert!(!dest.exists());
    }
}
