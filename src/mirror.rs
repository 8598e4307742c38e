//! Filesystem Mirror: recursive copy-with-overwrite and recursive delete.
//!
//! Both passes keep going after a failed entry and collect the failures in
//! the returned report. A missing source is a no-op, not an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::FsError;

#[cfg(windows)]
use std::os::windows::fs::MetadataExt;

#[derive(Debug, Default)]
pub struct FsReport {
    pub files: u64,
    pub dirs: u64,
    pub links: u64,
    /// Source (mirror) or target (purge) was absent; nothing was touched.
    pub missing: bool,
    pub failures: Vec<FsError>,
}

impl FsReport {
    fn missing() -> Self {
        Self { missing: true, ..Self::default() }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &Path, source: io::Error) {
        warn!("{}: {}", path.display(), source);
        self.failures.push(FsError { path: path.to_path_buf(), source });
    }

    fn fail_walk(&mut self, fallback: &Path, err: walkdir::Error) {
        let path = err.path().unwrap_or(fallback).to_path_buf();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
        self.fail(&path, source);
    }

    pub fn summary(&self) -> String {
        if self.missing {
            return "nothing to do (not found)".to_string();
        }
        let mut s = format!("{} files, {} dirs", self.files, self.dirs);
        if self.links > 0 {
            s.push_str(&format!(", {} links", self.links));
        }
        if !self.failures.is_empty() {
            s.push_str(&format!(", {} failed", self.failures.len()));
        }
        s
    }
}

/// Copy every entry under `src` into `dst`, creating `dst` and intermediate
/// directories and overwriting existing files. Links and reparse points are
/// counted in `links` and skipped, never followed.
pub fn mirror(src: &Path, dst: &Path) -> FsReport {
    if !src.exists() {
        debug!("mirror: source {} does not exist", src.display());
        return FsReport::missing();
    }
    let mut report = FsReport::default();
    if !src.is_dir() {
        report.fail(src, io::Error::other("source is not a directory"));
        return report;
    }
    if let Err(e) = fs::create_dir_all(dst) {
        report.fail(dst, e);
        return report;
    }
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                report.fail_walk(src, err);
                continue;
            }
        };
        let rel = match entry.path().strip_prefix(src) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let target = dst.join(rel);
        if entry.path_is_symlink() || is_reparse_point(entry.path()) {
            debug!("mirror: skipping link {}", entry.path().display());
            report.links += 1;
            continue;
        }
        if entry.file_type().is_dir() {
            match fs::create_dir_all(&target) {
                Ok(()) => report.dirs += 1,
                Err(e) => report.fail(&target, e),
            }
            continue;
        }
        if let Some(parent) = target.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                report.fail(parent, e);
                continue;
            }
        }
        // An existing read-only copy would make fs::copy fail.
        set_writable(&target);
        match fs::copy(entry.path(), &target) {
            Ok(_) => report.files += 1,
            Err(e) => report.fail(entry.path(), e),
        }
    }
    report
}

/// Delete `path` and everything under it. Links are removed, never followed.
pub fn purge(path: &Path) -> FsReport {
    let md = match fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return FsReport::missing(),
        Err(e) => {
            let mut report = FsReport::default();
            report.fail(path, e);
            return report;
        }
    };
    let mut report = FsReport::default();
    if is_reparse_point(path) || md.file_type().is_symlink() {
        match remove_link(path) {
            Ok(()) => report.links += 1,
            Err(e) => report.fail(path, e),
        }
        return report;
    }
    if !md.is_dir() {
        set_writable(path);
        match fs::remove_file(path) {
            Ok(()) => report.files += 1,
            Err(e) => report.fail(path, e),
        }
        return report;
    }
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                report.fail_walk(path, err);
                continue;
            }
        };
        let p = entry.path();
        if entry.path_is_symlink() || is_reparse_point(p) {
            match remove_link(p) {
                Ok(()) => report.links += 1,
                Err(e) => report.fail(p, e),
            }
        } else if entry.file_type().is_dir() {
            // Children that failed keep this directory alive; do not report it twice.
            if report.failures.iter().any(|f| f.path.starts_with(p)) {
                continue;
            }
            set_writable(p);
            match fs::remove_dir(p) {
                Ok(()) => report.dirs += 1,
                Err(e) => report.fail(p, e),
            }
        } else {
            set_writable(p);
            match fs::remove_file(p) {
                Ok(()) => report.files += 1,
                Err(e) => report.fail(p, e),
            }
        }
    }
    report
}

#[derive(Debug)]
pub struct RelocateReport {
    pub copied: FsReport,
    /// `None` when the copy was incomplete and the source was kept.
    pub purged: Option<FsReport>,
}

/// Move a tree: mirror it, then purge the source only if the copy was clean.
pub fn relocate(src: &Path, dst: &Path) -> RelocateReport {
    let copied = mirror(src, dst);
    if copied.missing || !copied.is_clean() {
        return RelocateReport { copied, purged: None };
    }
    let purged = purge(src);
    RelocateReport { copied, purged: Some(purged) }
}

/// Relative paths of every regular file under `root`, sorted.
pub fn file_set(root: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    out.sort();
    out
}

fn remove_link(p: &Path) -> io::Result<()> {
    fs::remove_dir(p).or_else(|_| fs::remove_file(p))
}

#[cfg(windows)]
fn is_reparse_point(p: &Path) -> bool {
    if let Ok(md) = fs::symlink_metadata(p) {
        // FILE_ATTRIBUTE_REPARSE_POINT = 0x0400
        (md.file_attributes() & 0x0400) != 0
    } else {
        false
    }
}

#[cfg(not(windows))]
fn is_reparse_point(_p: &Path) -> bool { false }

fn set_writable(path: &Path) {
    if let Ok(metadata) = fs::symlink_metadata(path) {
        let mut perms = metadata.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn missing_source_and_target_are_no_ops() {
        let tmp = tempfile::tempdir().unwrap();
        let dst = tmp.path().join("dst");
        let m = mirror(&tmp.path().join("nope"), &dst);
        assert!(m.missing && m.is_clean());
        assert!(!dst.exists());

        let p = purge(&tmp.path().join("nope"));
        assert!(p.missing && p.is_clean());
    }

    #[test]
    fn backup_round_trip_reproduces_file_set() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("LocalStorage");
        write(&src.join("a.dat"), "a");
        write(&src.join("nested/deeper/b.dat"), "b");
        fs::create_dir_all(src.join("empty")).unwrap();

        let backup = tmp.path().join("backup/LocalStorage");
        let restored = tmp.path().join("restored/LocalStorage");
        assert!(mirror(&src, &backup).is_clean());
        let r = mirror(&backup, &restored);
        assert!(r.is_clean());
        assert_eq!(r.files, 2);
        assert_eq!(file_set(&src), file_set(&restored));
        assert!(restored.join("empty").is_dir());
        assert_eq!(fs::read_to_string(restored.join("nested/deeper/b.dat")).unwrap(), "b");
    }

    #[test]
    fn mirror_overwrites_existing_files_including_read_only() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("f.txt"), "new");
        write(&dst.join("f.txt"), "old");
        write(&dst.join("keep.txt"), "untouched");
        let mut perms = fs::metadata(dst.join("f.txt")).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(dst.join("f.txt"), perms).unwrap();

        assert!(mirror(&src, &dst).is_clean());
        assert_eq!(fs::read_to_string(dst.join("f.txt")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dst.join("keep.txt")).unwrap(), "untouched");
    }

    #[test]
    fn purge_removes_whole_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Roblox");
        write(&root.join("logs/x.log"), "x");
        write(&root.join("y.bin"), "y");
        let r = purge(&root);
        assert!(r.is_clean());
        assert_eq!(r.files, 2);
        assert_eq!(r.dirs, 2);
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn purge_removes_symlink_without_following_it() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        write(&outside.join("precious.txt"), "keep");
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let r = purge(&root);
        assert!(r.is_clean());
        assert_eq!(r.links, 1);
        assert!(!root.exists());
        assert!(outside.join("precious.txt").is_file());
    }

    #[test]
    fn mirror_keeps_going_past_a_failed_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        for name in ["a.txt", "b.txt", "c.txt"] {
            write(&src.join(name), name);
        }
        // A directory squatting on the destination file name cannot be overwritten.
        write(&dst.join("b.txt/inner"), "x");

        let r = mirror(&src, &dst);
        assert_eq!(r.files, 2);
        assert_eq!(r.failures.len(), 1);
        assert_eq!(r.failures[0].path, src.join("b.txt"));
        assert!(r.summary().ends_with("1 failed"));
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a.txt");
        assert_eq!(fs::read_to_string(dst.join("c.txt")).unwrap(), "c.txt");
        assert!(dst.join("b.txt/inner").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn mirror_skips_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        write(&outside.join("secret.txt"), "s");
        let src = tmp.path().join("src");
        write(&src.join("kept.txt"), "k");
        std::os::unix::fs::symlink(&outside, src.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.join("secret.txt"), src.join("file-link")).unwrap();

        let dst = tmp.path().join("dst");
        let r = mirror(&src, &dst);
        assert!(r.is_clean());
        assert_eq!((r.files, r.links), (1, 2));
        assert!(dst.join("kept.txt").is_file());
        assert!(fs::symlink_metadata(dst.join("link")).is_err());
        assert!(fs::symlink_metadata(dst.join("file-link")).is_err());
    }

    #[test]
    fn relocate_moves_tree_and_drops_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("Program Files/Versions");
        write(&src.join("version-1/RobloxPlayerBeta.exe"), "bin");
        let dst = tmp.path().join("LocalAppData/Roblox/Versions");
        let r = relocate(&src, &dst);
        assert!(r.copied.is_clean());
        assert!(r.purged.as_ref().is_some_and(FsReport::is_clean));
        assert!(!src.exists());
        assert!(dst.join("version-1/RobloxPlayerBeta.exe").is_file());
    }

    #[test]
    fn relocate_of_missing_source_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let r = relocate(&tmp.path().join("none"), &tmp.path().join("dst"));
        assert!(r.copied.missing);
        assert!(r.purged.is_none());
        assert!(!tmp.path().join("dst").exists());
    }
}
