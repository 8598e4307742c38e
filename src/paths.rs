//! Well-known per-user locations and the backup layout.
//!
//! Every lookup tries the platform known-folder first and falls back to
//! environment variables. Nothing here fails: an unresolved location is
//! `None` and the caller skips its step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Fixed directory name under the local temp folder.
pub const BACKUP_DIR_NAME: &str = "ZenithFixerBackup";
/// Environment variable the sync client sets to its root folder.
pub const CLOUD_SYNC_ENV: &str = "OneDrive";
const CLOUD_SYNC_SUBDIR: &str = "OneDrive";

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct PathResolver {
    env: EnvLookup,
    known_folders: bool,
}

impl PathResolver {
    /// Known folders plus the process environment.
    pub fn system() -> Self {
        Self { env: Box::new(|k| std::env::var(k).ok()), known_folders: true }
    }

    /// Environment-only resolution from a fixed map.
    pub fn from_env_map(map: HashMap<String, String>) -> Self {
        Self { env: Box::new(move |k| map.get(k).cloned()), known_folders: false }
    }

    fn var(&self, name: &str) -> Option<PathBuf> {
        (self.env)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    fn known(&self, lookup: fn() -> Option<PathBuf>) -> Option<PathBuf> {
        if self.known_folders { lookup() } else { None }
    }

    fn profile_subdir(&self, name: &str) -> Option<PathBuf> {
        self.var("USERPROFILE").map(|p| p.join(name))
    }

    pub fn downloads(&self) -> Option<PathBuf> {
        self.known(dirs::download_dir).or_else(|| self.profile_subdir("Downloads"))
    }

    pub fn desktop(&self) -> Option<PathBuf> {
        self.known(dirs::desktop_dir).or_else(|| self.profile_subdir("Desktop"))
    }

    /// The sync client's folder, only if it exists on disk.
    pub fn cloud_sync(&self) -> Option<PathBuf> {
        if let Some(p) = self.var(CLOUD_SYNC_ENV).filter(|p| p.is_dir()) {
            return Some(p);
        }
        let home = self.known(dirs::home_dir).or_else(|| self.var("USERPROFILE"))?;
        Some(home.join(CLOUD_SYNC_SUBDIR)).filter(|p| p.is_dir())
    }

    pub fn local_app_data(&self) -> Option<PathBuf> {
        self.known(dirs::data_local_dir).or_else(|| self.var("LOCALAPPDATA"))
    }

    pub fn local_temp(&self) -> Option<PathBuf> {
        self.local_app_data()
            .map(|p| p.join("Temp"))
            .or_else(|| self.var("TEMP"))
            .or_else(|| self.var("TMP"))
    }

    pub fn backup_root(&self) -> Option<PathBuf> {
        self.local_temp().map(|t| t.join(BACKUP_DIR_NAME))
    }

    /// The 32-bit program files folder; no known-folder lookup exists for it.
    pub fn program_files_x86(&self) -> Option<PathBuf> {
        self.var("ProgramFiles(x86)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPair {
    pub name: &'static str,
    pub source: PathBuf,
    pub backup: PathBuf,
}

/// Named (source, backup) pairs under one backup root. The root depends only
/// on the local temp folder, so every run backs up to and restores from the
/// same place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    pub app_root: PathBuf,
    pub root: PathBuf,
    pub pairs: Vec<BackupPair>,
}

impl BackupSet {
    pub fn new(app_root: &Path, root: &Path, names: &[&'static str]) -> Self {
        let pairs = names
            .iter()
            .map(|&name| BackupPair { name, source: app_root.join(name), backup: root.join(name) })
            .collect();
        Self { app_root: app_root.to_path_buf(), root: root.to_path_buf(), pairs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(pairs: &[(&str, &str)]) -> PathResolver {
        PathResolver::from_env_map(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn falls_back_to_profile_subfolders() {
        let r = resolver(&[("USERPROFILE", "/home/op")]);
        assert_eq!(r.downloads(), Some(PathBuf::from("/home/op/Downloads")));
        assert_eq!(r.desktop(), Some(PathBuf::from("/home/op/Desktop")));
    }

    #[test]
    fn empty_environment_resolves_nothing() {
        let r = resolver(&[("USERPROFILE", "  "), ("LOCALAPPDATA", "")]);
        assert_eq!(r.downloads(), None);
        assert_eq!(r.desktop(), None);
        assert_eq!(r.cloud_sync(), None);
        assert_eq!(r.local_app_data(), None);
        assert_eq!(r.local_temp(), None);
        assert_eq!(r.backup_root(), None);
    }

    #[test]
    fn temp_prefers_local_app_data_then_temp_var() {
        let r = resolver(&[("LOCALAPPDATA", "/lad"), ("TEMP", "/t")]);
        assert_eq!(r.local_temp(), Some(PathBuf::from("/lad/Temp")));
        assert_eq!(r.backup_root(), Some(PathBuf::from("/lad/Temp").join(BACKUP_DIR_NAME)));

        let r = resolver(&[("TEMP", "/t")]);
        assert_eq!(r.local_temp(), Some(PathBuf::from("/t")));
        let r = resolver(&[("TMP", "/tmp2")]);
        assert_eq!(r.local_temp(), Some(PathBuf::from("/tmp2")));
    }

    #[test]
    fn cloud_sync_uses_env_then_checks_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let profile = tmp.path().to_string_lossy().to_string();
        let r = resolver(&[("USERPROFILE", &profile)]);
        assert_eq!(r.cloud_sync(), None);

        std::fs::create_dir_all(tmp.path().join("OneDrive")).unwrap();
        assert_eq!(r.cloud_sync(), Some(tmp.path().join("OneDrive")));

        let custom = tmp.path().join("OneDrive - Contoso");
        std::fs::create_dir_all(&custom).unwrap();
        let custom_s = custom.to_string_lossy().to_string();
        let r = resolver(&[("USERPROFILE", &profile), (CLOUD_SYNC_ENV, &custom_s)]);
        assert_eq!(r.cloud_sync(), Some(custom));
    }

    #[test]
    fn backup_set_pairs_share_one_root() {
        let set = BackupSet::new(Path::new("/lad/Roblox"), Path::new("/t/ZenithFixerBackup"), &["LocalStorage", "rbx-storage"]);
        assert_eq!(set.pairs.len(), 2);
        assert_eq!(set.pairs[1].source, PathBuf::from("/lad/Roblox/rbx-storage"));
        assert_eq!(set.pairs[1].backup, PathBuf::from("/t/ZenithFixerBackup/rbx-storage"));
    }
}
