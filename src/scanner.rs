//! Exclusion Scanner: walk a set of roots, register every entry whose name
//! matches a target (and its parent directory) with the allow-listing
//! mechanism, once per path per scan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::names::NameSet;
use crate::runner::{ps_quote, CommandRunner, Invocation};

/// Side-effecting allow-list registration for one absolute path.
pub trait ExclusionRegistrar: Send + Sync {
    fn register(&self, path: &Path) -> Result<(), String>;
}

/// Registers paths through `Add-MpPreference -ExclusionPath`.
pub struct DefenderRegistrar<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> DefenderRegistrar<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl ExclusionRegistrar for DefenderRegistrar<'_> {
    fn register(&self, path: &Path) -> Result<(), String> {
        let script = format!("Add-MpPreference -ExclusionPath {}", ps_quote(&path.to_string_lossy()));
        match self.runner.run(&Invocation::powershell(&script)) {
            Ok(0) => Ok(()),
            Ok(code) => Err(format!("Add-MpPreference exited with code {}", code)),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No root resolved or nothing matched.
    NothingToDo { roots_scanned: usize },
    Registered {
        /// Registration order; each path appears once.
        registered: Vec<PathBuf>,
        failed: Vec<(PathBuf, String)>,
        unreadable: usize,
    },
}

/// Paths already registered during the current scan.
#[derive(Debug, Default)]
pub struct ExclusionRecord {
    seen: HashSet<PathBuf>,
}

impl ExclusionRecord {
    /// True the first time `path` is offered.
    pub fn insert(&mut self, path: &Path) -> bool {
        self.seen.insert(path.to_path_buf())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

pub struct ExclusionScanner<'a> {
    registrar: &'a dyn ExclusionRegistrar,
    targets: &'a NameSet,
}

impl<'a> ExclusionScanner<'a> {
    pub fn new(registrar: &'a dyn ExclusionRegistrar, targets: &'a NameSet) -> Self {
        Self { registrar, targets }
    }

    pub fn scan(&self, roots: &[PathBuf]) -> ScanOutcome {
        let mut record = ExclusionRecord::default();
        let mut registered = Vec::new();
        let mut failed = Vec::new();
        let mut unreadable = 0usize;
        let mut roots_scanned = 0usize;

        for root in roots {
            if !root.is_dir() {
                debug!("exclusion scan: skipping missing root {}", root.display());
                continue;
            }
            roots_scanned += 1;
            info!("Scanning {} for exclusion targets", root.display());
            let mut walker = WalkDir::new(root).min_depth(1).into_iter();
            while let Some(next) = walker.next() {
                let entry = match next {
                    Ok(e) => e,
                    Err(err) => {
                        // Permission denied and friends: skip the entry, keep walking.
                        debug!("exclusion scan: {}", err);
                        unreadable += 1;
                        continue;
                    }
                };
                let name = entry.file_name().to_string_lossy();
                if !self.targets.matches(&name) {
                    continue;
                }
                let path = entry.path().to_path_buf();
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                self.register_once(&mut record, &path, &mut registered, &mut failed);
                if let Some(parent) = path.parent() {
                    self.register_once(&mut record, parent, &mut registered, &mut failed);
                }
            }
        }

        if record.is_empty() {
            return ScanOutcome::NothingToDo { roots_scanned };
        }
        ScanOutcome::Registered { registered, failed, unreadable }
    }

    fn register_once(
        &self,
        record: &mut ExclusionRecord,
        path: &Path,
        registered: &mut Vec<PathBuf>,
        failed: &mut Vec<(PathBuf, String)>,
    ) {
        if !record.insert(path) {
            return;
        }
        match self.registrar.register(path) {
            Ok(()) => {
                info!("Added exclusion: {}", path.display());
                registered.push(path.to_path_buf());
            }
            Err(e) => {
                warn!("Failed to add exclusion {}: {}", path.display(), e);
                failed.push((path.to_path_buf(), e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NamePattern;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<PathBuf>>,
        reject: Option<PathBuf>,
    }

    impl ExclusionRegistrar for Recorder {
        fn register(&self, path: &Path) -> Result<(), String> {
            self.calls.lock().unwrap().push(path.to_path_buf());
            if self.reject.as_deref() == Some(path) {
                return Err("denied".into());
            }
            Ok(())
        }
    }

    fn touch(p: &Path) {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"").unwrap();
    }

    #[test]
    fn registers_matches_and_parents_without_descending() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        touch(&root.join("A.exe"));
        fs::create_dir_all(root.join("sub/C")).unwrap();
        touch(&root.join("sub/C/A.exe"));
        touch(&root.join("sub/C/inner/B.dll"));

        let targets = NameSet::exacts(&["A.exe", "B.dll", "C"]);
        let rec = Recorder::default();
        let outcome = ExclusionScanner::new(&rec, &targets).scan(&[root.clone()]);

        let calls: HashSet<PathBuf> = rec.calls.lock().unwrap().iter().cloned().collect();
        let expected: HashSet<PathBuf> =
            [root.join("A.exe"), root.clone(), root.join("sub/C"), root.join("sub")].into_iter().collect();
        assert_eq!(calls, expected);
        assert_eq!(rec.calls.lock().unwrap().len(), 4);
        match outcome {
            ScanOutcome::Registered { registered, failed, .. } => {
                assert_eq!(registered.len(), 4);
                assert!(failed.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn shared_parents_and_overlapping_roots_register_once() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Downloads");
        touch(&root.join("zenith.exe"));
        touch(&root.join("zenith-ui.dll"));
        touch(&root.join("ZENITH.cfg"));

        let targets = NameSet::new(vec![NamePattern::substring("zenith")]);
        let rec = Recorder::default();
        ExclusionScanner::new(&rec, &targets).scan(&[root.clone(), root.clone()]);

        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.iter().filter(|p| **p == root).count(), 1);
    }

    #[test]
    fn nothing_to_do_when_no_roots_or_no_matches() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("unrelated.txt"));
        let targets = NameSet::exacts(&["zenith"]);
        let rec = Recorder::default();
        let scanner = ExclusionScanner::new(&rec, &targets);

        assert_eq!(scanner.scan(&[]), ScanOutcome::NothingToDo { roots_scanned: 0 });
        assert_eq!(
            scanner.scan(&[tmp.path().join("missing")]),
            ScanOutcome::NothingToDo { roots_scanned: 0 }
        );
        assert_eq!(scanner.scan(&[tmp.path().to_path_buf()]), ScanOutcome::NothingToDo { roots_scanned: 1 });
        assert!(rec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn registration_failure_is_recorded_and_scan_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Desktop");
        fs::create_dir_all(root.join("zenith")).unwrap();
        let rec = Recorder { reject: Some(root.join("zenith")), ..Recorder::default() };
        let targets = NameSet::exacts(&["zenith"]);
        match ExclusionScanner::new(&rec, &targets).scan(&[root.clone()]) {
            ScanOutcome::Registered { registered, failed, .. } => {
                assert_eq!(registered, vec![root.clone()]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, root.join("zenith"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_is_counted_and_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Downloads");
        touch(&root.join("zenith.exe"));
        let locked = root.join("locked");
        touch(&locked.join("zenith-hidden.exe"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users read through the mode bits; nothing is unreadable then.
        let denied = fs::read_dir(&locked).is_err();

        let targets = NameSet::new(vec![NamePattern::substring("zenith")]);
        let rec = Recorder::default();
        let outcome = ExclusionScanner::new(&rec, &targets).scan(&[root.clone()]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        match outcome {
            ScanOutcome::Registered { registered, failed, unreadable } => {
                assert!(registered.contains(&root.join("zenith.exe")));
                assert!(registered.contains(&root));
                assert!(failed.is_empty());
                assert_eq!(unreadable, usize::from(denied));
                assert_eq!(registered.contains(&locked.join("zenith-hidden.exe")), !denied);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
