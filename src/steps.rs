//! The fixed remediation step list.
//!
//! Order: system repair, optional DNS change, Defender exclusions, data
//! backup, removal, reinstall, relocation, process termination, restore.
//! Progress weights are cumulative and never decrease.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::fetch::{Fetcher, HttpFetcher};
use crate::mirror::{mirror, purge, relocate};
use crate::names::{NamePattern, NameSet};
use crate::orchestrator::{Decision, Plan, Prompt, Step, StepContext, StepOutcome};
use crate::paths::{BackupSet, PathResolver};
use crate::runner::{CommandRunner, Invocation, SystemRunner};
use crate::scanner::{DefenderRegistrar, ExclusionScanner, ScanOutcome};
use crate::terminator::{terminate, ProcessControl, SystemProcesses, TerminateTimings};
use crate::watcher::{DownloadWatch, WatchOutcome, WatchSpec};

pub const APP_DIR: &str = "Roblox";
pub const BACKUP_NAMES: &[&str] = &["LocalStorage", "rbx-storage"];
pub const REMOVE_DIRS: &[&str] = &["Roblox", "fishstrap", "bloxstrap"];
pub const PROCESS_NAMES: &[&str] = &[
    "RobloxPlayerBeta.exe",
    "RobloxPlayerLauncher.exe",
    "RobloxCrashHandler.exe",
    "Bloxstrap.exe",
    "Fishstrap.exe",
];

pub const VC_REDIST_URL: &str = "https://aka.ms/vs/17/release/vc_redist.x64.exe";
pub const INSTALLER_URL: &str = "https://www.roblox.com/download/client?os=win";
pub const DOWNLOAD_PAGE: &str = "https://www.roblox.com/download";
const INSTALLER_FILE: &str = "RobloxPlayerInstaller.exe";
const DEFAULT_PROGRAM_FILES_X86: &str = r"C:\Program Files (x86)";

pub const DEFAULT_WATCH_WAIT: Duration = Duration::from_secs(300);
const WATCH_POLL: Duration = Duration::from_secs(2);

const DNS_SCRIPT: &str = "Get-NetAdapter -Physical | Where-Object {$_.Status -eq 'Up'} | ForEach-Object { \
    Set-DnsClientServerAddress -InterfaceIndex $_.ifIndex -ServerAddresses '1.1.1.1' -ErrorAction SilentlyContinue }";
const CLOSE_BROWSER_SCRIPT: &str = "Get-Process | Where-Object { @('chrome','msedge','firefox','opera','brave') \
    -contains $_.ProcessName -and $_.MainWindowTitle -like '*Roblox*' } | ForEach-Object { $_.CloseMainWindow() | Out-Null }";

// Success codes: DISM/SFC/w32tm use 1 for "done, with findings";
// the redistributable uses 1638 (newer installed) and 3010 (reboot pending).
const REPAIR_OK: &[i32] = &[0, 1];
const REDIST_OK: &[i32] = &[0, 1638, 3010];

/// File and folder names that get a Defender exclusion.
pub fn exclusion_targets() -> NameSet {
    NameSet::new(vec![NamePattern::substring("zenith")])
}

/// Everything the steps touch on the host.
pub struct Toolkit {
    pub runner: Arc<dyn CommandRunner>,
    pub fetcher: Arc<dyn Fetcher>,
    pub paths: PathResolver,
    pub watch_wait: Duration,
    pub watch_poll: Duration,
    pub timings: TerminateTimings,
    /// Opens the process table the termination step works on.
    pub processes: ProcessTable,
}

pub type ProcessTable = for<'a> fn(&'a Toolkit) -> Box<dyn ProcessControl + 'a>;

fn system_processes(kit: &Toolkit) -> Box<dyn ProcessControl + '_> {
    Box::new(SystemProcesses::new(kit.runner.as_ref()))
}

impl Toolkit {
    pub fn system(watch_wait: Duration) -> Self {
        Self {
            runner: Arc::new(SystemRunner),
            fetcher: Arc::new(HttpFetcher),
            paths: PathResolver::system(),
            watch_wait,
            watch_poll: WATCH_POLL,
            timings: TerminateTimings::default(),
            processes: system_processes,
        }
    }
}

type StepFn = fn(&Toolkit, &mut StepContext) -> StepOutcome;

const STEPS: &[(&str, u8, StepFn)] = &[
    ("Running DISM...", 5, dism),
    ("Syncing date and time...", 10, time_sync),
    ("Running SFC...", 15, sfc),
    ("Installing/repairing VC++ redistributable...", 25, vc_redist),
    ("Enabling DEP...", 30, enable_dep),
    ("Prompting about DNS change...", 35, dns_change),
    ("Adding Defender exclusions...", 50, add_exclusions),
    ("Backing up Roblox data...", 60, backup),
    ("Deleting LocalAppData Roblox, fishstrap and bloxstrap...", 70, remove_app_data),
    ("Attempting per-user Roblox install...", 80, reinstall),
    ("Moving Versions to LocalAppData...", 85, relocate_versions),
    ("Closing running Roblox processes...", 90, close_processes),
    ("Restoring Roblox data...", 95, restore),
];

pub fn remediation_steps(kit: &Arc<Toolkit>) -> Vec<Step> {
    STEPS
        .iter()
        .map(|&(description, progress, f)| {
            let kit = Arc::clone(kit);
            Step::new(description, progress, move |ctx| f(&kit, ctx))
        })
        .collect()
}

pub fn remediation_plan(kit: Toolkit) -> Plan {
    let kit = Arc::new(kit);
    Box::new(move || remediation_steps(&kit))
}

fn run_tool(kit: &Toolkit, inv: Invocation, ok: &[i32]) -> StepOutcome {
    debug!("running {}", inv.display());
    match kit.runner.run(&inv) {
        Ok(code) if ok.contains(&code) => StepOutcome::Completed(format!("exit code {}", code)),
        Ok(code) => StepOutcome::Recoverable(format!("{} exited with code {}", inv.program, code)),
        Err(e) => StepOutcome::Recoverable(e.to_string()),
    }
}

fn dism(kit: &Toolkit, _ctx: &mut StepContext) -> StepOutcome {
    run_tool(kit, Invocation::new("DISM.exe", "/Online /Cleanup-Image /RestoreHealth"), REPAIR_OK)
}

fn time_sync(kit: &Toolkit, _ctx: &mut StepContext) -> StepOutcome {
    run_tool(kit, Invocation::new("w32tm.exe", "/resync /rediscover"), REPAIR_OK)
}

fn sfc(kit: &Toolkit, _ctx: &mut StepContext) -> StepOutcome {
    run_tool(kit, Invocation::new("sfc.exe", "/scannow"), REPAIR_OK)
}

fn vc_redist(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    let Some(temp) = kit.paths.local_temp() else {
        return StepOutcome::Recoverable("local temp folder not found".into());
    };
    let dest = temp.join("vc_redist.x64.exe");
    if let Err(e) = kit.fetcher.fetch(VC_REDIST_URL, &dest) {
        return StepOutcome::Recoverable(format!("VC++ download failed: {}", e));
    }
    ctx.log(" VC++ downloaded, installing...");
    run_tool(kit, Invocation::new(dest.to_string_lossy(), "/install /quiet /norestart"), REDIST_OK)
}

fn enable_dep(kit: &Toolkit, _ctx: &mut StepContext) -> StepOutcome {
    run_tool(kit, Invocation::powershell("Set-ProcessMitigation -System -Enable DEP"), &[0])
}

fn dns_change(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    if ctx.ask(Prompt::DnsChange) != Decision::Accept {
        ctx.log(" DNS change skipped by user.");
        return StepOutcome::Completed("skipped".into());
    }
    ctx.log(" Changing DNS to 1.1.1.1...");
    run_tool(kit, Invocation::powershell(DNS_SCRIPT), &[0])
}

fn add_exclusions(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    let candidates = [
        ("Downloads", kit.paths.downloads()),
        ("Desktop", kit.paths.desktop()),
        ("OneDrive", kit.paths.cloud_sync()),
    ];
    let mut roots = Vec::new();
    for (label, root) in candidates {
        match root {
            Some(p) => roots.push(p),
            None => ctx.log(format!(" {} folder not found; skipping", label)),
        }
    }

    let registrar = DefenderRegistrar::new(kit.runner.as_ref());
    let targets = exclusion_targets();
    match ExclusionScanner::new(&registrar, &targets).scan(&roots) {
        ScanOutcome::NothingToDo { roots_scanned } => {
            ctx.log(format!(" No matching files or folders found ({} folders scanned).", roots_scanned));
            StepOutcome::Completed("nothing to do".into())
        }
        ScanOutcome::Registered { registered, failed, unreadable } => {
            for p in &registered {
                ctx.log(format!(" Excluded: {}", p.display()));
            }
            if unreadable > 0 {
                ctx.log(format!(" {} entries could not be read", unreadable));
            }
            if failed.is_empty() {
                StepOutcome::Completed(format!("{} exclusions added", registered.len()))
            } else {
                for (p, e) in &failed {
                    ctx.log(format!(" Failed: {} ({})", p.display(), e));
                }
                StepOutcome::Recoverable(format!("{} exclusions could not be added", failed.len()))
            }
        }
    }
}

fn backup_set(kit: &Toolkit) -> Result<BackupSet, String> {
    let lad = kit.paths.local_app_data().ok_or("LocalAppData not found")?;
    let root = kit.paths.backup_root().ok_or("local temp folder not found")?;
    Ok(BackupSet::new(&lad.join(APP_DIR), &root, BACKUP_NAMES))
}

fn backup(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    let set = match backup_set(kit) {
        Ok(s) => s,
        Err(e) => return StepOutcome::Recoverable(e),
    };
    let mut failures = 0usize;
    for pair in &set.pairs {
        // The backup holds only what this run copies; restore reads it back verbatim.
        let cleared = purge(&pair.backup);
        if !cleared.is_clean() {
            ctx.log(format!(" Could not clear old backup of {}: {}", pair.name, cleared.summary()));
            failures += cleared.failures.len();
            continue;
        }
        if !pair.source.is_dir() {
            ctx.log(format!(" {} not found; nothing to back up", pair.name));
            continue;
        }
        let report = mirror(&pair.source, &pair.backup);
        ctx.log(format!(" back up {}: {}", pair.name, report.summary()));
        failures += report.failures.len();
    }
    if failures == 0 {
        StepOutcome::done()
    } else {
        StepOutcome::Recoverable(format!("{} entries failed to back up", failures))
    }
}

fn restore(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    let set = match backup_set(kit) {
        Ok(s) => s,
        Err(e) => return StepOutcome::Recoverable(e),
    };
    let mut failures = 0usize;
    for pair in &set.pairs {
        if !pair.backup.is_dir() {
            ctx.log(format!(" {} not found; nothing to restore", pair.name));
            continue;
        }
        let report = mirror(&pair.backup, &pair.source);
        ctx.log(format!(" restore {}: {}", pair.name, report.summary()));
        failures += report.failures.len();
    }
    if failures == 0 {
        StepOutcome::done()
    } else {
        StepOutcome::Recoverable(format!("{} entries failed to restore", failures))
    }
}

fn remove_app_data(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    let Some(lad) = kit.paths.local_app_data() else {
        return StepOutcome::Recoverable("LocalAppData not found".into());
    };
    let mut failed = 0usize;
    for name in REMOVE_DIRS {
        let path = lad.join(name);
        let report = purge(&path);
        if report.missing {
            ctx.log(format!(" Not found: {}", path.display()));
        } else if report.is_clean() {
            ctx.log(format!(" Removed: {}", path.display()));
        } else {
            ctx.log(format!(" Failed to remove {}: {}", path.display(), report.summary()));
            failed += 1;
        }
    }
    if failed == 0 {
        StepOutcome::done()
    } else {
        StepOutcome::Recoverable(format!("{} folders could not be fully removed", failed))
    }
}

fn reinstall(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    if let Err(e) = kit.runner.run(&Invocation::powershell(CLOSE_BROWSER_SCRIPT)) {
        debug!("closing browser windows: {}", e);
    }

    let mut saved = None;
    match kit.paths.local_temp() {
        Some(temp) => {
            let dest = temp.join(INSTALLER_FILE);
            match kit.fetcher.fetch(INSTALLER_URL, &dest) {
                Ok(_) => {
                    ctx.log(format!(" Installer saved to: {}", dest.display()));
                    if launch_unelevated(kit, ctx, &dest) {
                        return StepOutcome::Completed("installer started".into());
                    }
                    saved = Some(dest);
                }
                Err(e) => ctx.log(format!(" Direct download failed: {}", e)),
            }
        }
        None => ctx.log(" Local temp folder not found; skipping direct download"),
    }

    match browser_handoff(kit, ctx) {
        Ok(()) => StepOutcome::Completed("installer ran from Downloads".into()),
        Err(reason) => {
            let hint = match saved {
                Some(p) => format!("run {} yourself", p.display()),
                None => format!("download it from {}", DOWNLOAD_PAGE),
            };
            StepOutcome::Recoverable(format!("{}; {}", reason, hint))
        }
    }
}

/// Shell launch through explorer first, so the installer does not inherit
/// our elevated token.
fn launch_unelevated(kit: &Toolkit, ctx: &mut StepContext, installer: &Path) -> bool {
    let shell = Invocation::new("explorer.exe", format!("\"{}\"", installer.display())).visible();
    match kit.runner.run(&shell) {
        Ok(_) => {
            ctx.log(" Installer launched (unelevated).");
            return true;
        }
        Err(e) => ctx.log(format!(" Unelevated shell launch failed: {}", e)),
    }
    let invoker = Invocation::new(installer.to_string_lossy(), "").visible().env("__COMPAT_LAYER", "RunAsInvoker");
    match kit.runner.run(&invoker) {
        Ok(code) => {
            ctx.log(format!(" Installer exited with code {}", code));
            true
        }
        Err(e) => {
            ctx.log(format!(" RunAsInvoker launch failed: {}", e));
            false
        }
    }
}

fn browser_handoff(kit: &Toolkit, ctx: &mut StepContext) -> Result<(), String> {
    let downloads = kit.paths.downloads().ok_or("Downloads folder not found")?;
    let watch = DownloadWatch::begin(&downloads, kit.watch_wait).map_err(|e| e.to_string())?;

    ctx.log(" Opening the Roblox download page in your browser...");
    if let Err(e) = kit.runner.run(&Invocation::new("explorer.exe", DOWNLOAD_PAGE).visible()) {
        ctx.log(format!(" Could not open the browser: {}", e));
    }
    ctx.log(format!(" Waiting up to {}s for the installer in {}...", kit.watch_wait.as_secs(), downloads.display()));

    let spec = WatchSpec { needle: "roblox".into(), suffix: ".exe".into(), poll: kit.watch_poll, max_wait: kit.watch_wait };
    match watch.wait(&spec) {
        WatchOutcome::Found(path) => {
            ctx.log(format!(" Running {}", path.display()));
            kit.runner
                .run(&Invocation::new(path.to_string_lossy(), "").visible())
                .map(|code| debug!("installer exited with code {}", code))
                .map_err(|e| e.to_string())
        }
        WatchOutcome::TimedOut => Err("installer not detected in Downloads".into()),
    }
}

fn relocate_versions(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    let Some(lad) = kit.paths.local_app_data() else {
        return StepOutcome::Recoverable("LocalAppData not found".into());
    };
    let src = kit
        .paths
        .program_files_x86()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM_FILES_X86))
        .join(APP_DIR)
        .join("Versions");
    let dst = lad.join(APP_DIR).join("Versions");

    let report = relocate(&src, &dst);
    if report.copied.missing {
        ctx.log(format!(" {} not found; nothing to move", src.display()));
        return StepOutcome::Completed("nothing to move".into());
    }
    ctx.log(format!(" Copied: {}", report.copied.summary()));
    match report.purged {
        None => StepOutcome::Recoverable(format!("copy incomplete, kept {}", src.display())),
        Some(purged) if !purged.is_clean() => {
            StepOutcome::Recoverable(format!("could not fully remove {}: {}", src.display(), purged.summary()))
        }
        Some(_) => StepOutcome::Completed(format!("moved to {}", dst.display())),
    }
}

fn close_processes(kit: &Toolkit, ctx: &mut StepContext) -> StepOutcome {
    let targets = NameSet::substrings(PROCESS_NAMES);
    let mut table = (kit.processes)(kit);
    let report = terminate(table.as_mut(), &targets, kit.timings);
    ctx.log(format!(" {}", report.summary()));
    for (name, e) in &report.sweep_failures {
        ctx.log(format!(" Kill by name {} failed: {}", name, e));
    }
    if report.failed.is_empty() {
        StepOutcome::Completed(report.summary())
    } else {
        StepOutcome::Recoverable(format!("{} processes still running", report.failed.len()))
    }
}
