//! Process Census & Terminator.
//!
//! Graceful close first (top-level windows get WM_CLOSE), forceful
//! termination for whatever survives the grace interval, then a
//! kill-by-name sweep through the system tool for every target name. The
//! sweep runs even when the in-process path succeeded: it can reach
//! processes our handles cannot.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use sysinfo::{Pid, ProcessStatus, System};

use crate::names::NameSet;
use crate::runner::{CommandRunner, Invocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMatch {
    pub pid: u32,
    pub name: String,
}

pub trait ProcessControl {
    /// Fresh snapshot of every running process.
    fn list(&mut self) -> Vec<ProcessMatch>;
    /// Ask the process to close itself; returns how many windows were signalled.
    fn request_close(&mut self, pid: u32) -> usize;
    fn is_running(&mut self, pid: u32) -> bool;
    fn kill(&mut self, pid: u32) -> bool;
    /// Forceful kill by image name. "No such process" counts as success.
    fn kill_by_name(&mut self, name: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy)]
pub struct TerminateTimings {
    pub grace: Duration,
    pub exit_wait: Duration,
    pub poll: Duration,
}

impl Default for TerminateTimings {
    fn default() -> Self {
        Self { grace: Duration::from_secs(1), exit_wait: Duration::from_secs(5), poll: Duration::from_millis(100) }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    pub matched: Vec<ProcessMatch>,
    pub closed: Vec<u32>,
    pub killed: Vec<u32>,
    pub failed: Vec<u32>,
    pub sweep_failures: Vec<(String, String)>,
}

impl TerminationReport {
    pub fn summary(&self) -> String {
        format!(
            "{} matched, {} closed, {} killed, {} still running",
            self.matched.len(),
            self.closed.len(),
            self.killed.len(),
            self.failed.len()
        )
    }
}

pub fn terminate(ctl: &mut dyn ProcessControl, targets: &NameSet, timings: TerminateTimings) -> TerminationReport {
    let own = std::process::id();
    let mut report = TerminationReport {
        matched: ctl.list().into_iter().filter(|p| p.pid != own && targets.matches(&p.name)).collect(),
        ..TerminationReport::default()
    };

    for p in &report.matched {
        let n = ctl.request_close(p.pid);
        debug!("close request to {} (pid {}): {} windows", p.name, p.pid, n);
    }
    if !report.matched.is_empty() {
        thread::sleep(timings.grace);
    }

    for p in &report.matched {
        if !ctl.is_running(p.pid) {
            info!("{} (pid {}) closed", p.name, p.pid);
            report.closed.push(p.pid);
            continue;
        }
        if !ctl.kill(p.pid) {
            debug!("kill request for pid {} was refused", p.pid);
        }
        if wait_for_exit(ctl, p.pid, timings) {
            info!("{} (pid {}) terminated", p.name, p.pid);
            report.killed.push(p.pid);
        } else {
            warn!("{} (pid {}) is still running", p.name, p.pid);
            report.failed.push(p.pid);
        }
    }

    for pattern in targets.patterns() {
        if let Err(e) = ctl.kill_by_name(&pattern.name) {
            warn!("kill by name {} failed: {}", pattern.name, e);
            report.sweep_failures.push((pattern.name.clone(), e));
        }
    }
    report
}

fn wait_for_exit(ctl: &mut dyn ProcessControl, pid: u32, timings: TerminateTimings) -> bool {
    let start = Instant::now();
    while start.elapsed() < timings.exit_wait {
        if !ctl.is_running(pid) {
            return true;
        }
        thread::sleep(timings.poll);
    }
    !ctl.is_running(pid)
}

/// Live process table backed by `sysinfo`, with the kill-by-name sweep
/// delegated to the system tool.
pub struct SystemProcesses<'a> {
    system: System,
    runner: &'a dyn CommandRunner,
}

impl<'a> SystemProcesses<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { system: System::new(), runner }
    }
}

impl ProcessControl for SystemProcesses<'_> {
    fn list(&mut self) -> Vec<ProcessMatch> {
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .map(|(pid, p)| ProcessMatch { pid: pid.as_u32(), name: p.name().to_string() })
            .collect()
    }

    #[cfg(windows)]
    fn request_close(&mut self, pid: u32) -> usize {
        close_top_level_windows(pid)
    }

    #[cfg(not(windows))]
    fn request_close(&mut self, pid: u32) -> usize {
        match self.system.process(Pid::from_u32(pid)).and_then(|p| p.kill_with(sysinfo::Signal::Term)) {
            Some(true) => 1,
            _ => 0,
        }
    }

    fn is_running(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        if !self.system.refresh_process(pid) {
            return false;
        }
        self.system
            .process(pid)
            .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .unwrap_or(false)
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.system.process(Pid::from_u32(pid)).map(|p| p.kill()).unwrap_or(false)
    }

    fn kill_by_name(&mut self, name: &str) -> Result<(), String> {
        let (inv, not_found) = kill_by_name_invocation(name);
        match self.runner.run(&inv) {
            Ok(0) => Ok(()),
            Ok(code) if code == not_found => Ok(()),
            Ok(code) => Err(format!("{} exited with code {}", inv.program, code)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// The sweep command and the exit code it uses for "no such process".
#[cfg(windows)]
fn kill_by_name_invocation(name: &str) -> (Invocation, i32) {
    (Invocation::new("taskkill.exe", format!("/F /T /IM \"{}\"", name)), 128)
}

#[cfg(not(windows))]
fn kill_by_name_invocation(name: &str) -> (Invocation, i32) {
    (Invocation::new("pkill", format!("-KILL -i {}", name)), 1)
}

#[cfg(windows)]
fn close_top_level_windows(pid: u32) -> usize {
    use windows_sys::Win32::Foundation::{BOOL, HWND, LPARAM, TRUE};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindow, GetWindowThreadProcessId, IsWindowVisible, PostMessageW, GW_OWNER, WM_CLOSE,
    };

    struct Search {
        pid: u32,
        found: Vec<HWND>,
    }

    unsafe extern "system" fn collect(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam as *mut Search);
        let mut owner = 0u32;
        GetWindowThreadProcessId(hwnd, &mut owner);
        if owner == search.pid && IsWindowVisible(hwnd) != 0 && GetWindow(hwnd, GW_OWNER).is_null() {
            search.found.push(hwnd);
        }
        TRUE
    }

    let mut search = Search { pid, found: Vec::new() };
    unsafe {
        EnumWindows(Some(collect), &mut search as *mut Search as LPARAM);
    }
    search
        .found
        .iter()
        .filter(|&&hwnd| unsafe { PostMessageW(hwnd, WM_CLOSE, 0, 0) } != 0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// `polite` pids exit on close request; `stubborn` pids survive kill.
    #[derive(Default)]
    struct FakeTable {
        running: HashMap<u32, String>,
        polite: Vec<u32>,
        stubborn: Vec<u32>,
        close_requests: Vec<u32>,
        kills: Vec<u32>,
        swept: Vec<String>,
        sweep_error: Option<String>,
    }

    impl FakeTable {
        fn with(procs: &[(u32, &str)]) -> Self {
            Self { running: procs.iter().map(|(p, n)| (*p, n.to_string())).collect(), ..Self::default() }
        }
    }

    impl ProcessControl for FakeTable {
        fn list(&mut self) -> Vec<ProcessMatch> {
            let mut v: Vec<_> = self.running.iter().map(|(p, n)| ProcessMatch { pid: *p, name: n.clone() }).collect();
            v.sort_by_key(|m| m.pid);
            v
        }
        fn request_close(&mut self, pid: u32) -> usize {
            self.close_requests.push(pid);
            if self.polite.contains(&pid) {
                self.running.remove(&pid);
                return 1;
            }
            0
        }
        fn is_running(&mut self, pid: u32) -> bool {
            self.running.contains_key(&pid)
        }
        fn kill(&mut self, pid: u32) -> bool {
            self.kills.push(pid);
            if self.stubborn.contains(&pid) {
                return false;
            }
            self.running.remove(&pid).is_some()
        }
        fn kill_by_name(&mut self, name: &str) -> Result<(), String> {
            self.swept.push(name.to_string());
            match &self.sweep_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn fast() -> TerminateTimings {
        TerminateTimings {
            grace: Duration::from_millis(1),
            exit_wait: Duration::from_millis(30),
            poll: Duration::from_millis(5),
        }
    }

    #[test]
    fn graceful_then_forceful_then_sweep() {
        let mut t = FakeTable::with(&[(10, "RobloxPlayerBeta.exe"), (11, "Bloxstrap.exe"), (12, "explorer.exe")]);
        t.polite = vec![10];
        let targets = NameSet::substrings(&["robloxplayerbeta.exe", "bloxstrap.exe"]);
        let r = terminate(&mut t, &targets, fast());

        assert_eq!(r.matched.len(), 2);
        assert_eq!(r.closed, vec![10]);
        assert_eq!(r.killed, vec![11]);
        assert!(r.failed.is_empty());
        assert_eq!(t.close_requests, vec![10, 11]);
        assert_eq!(t.kills, vec![11]);
        assert_eq!(t.swept, vec!["robloxplayerbeta.exe", "bloxstrap.exe"]);
        assert!(t.running.contains_key(&12));
    }

    #[test]
    fn stubborn_process_is_reported_and_sweep_still_runs() {
        let mut t = FakeTable::with(&[(20, "FISHSTRAP.EXE")]);
        t.stubborn = vec![20];
        t.sweep_error = Some("access denied".into());
        let targets = NameSet::substrings(&["fishstrap"]);
        let r = terminate(&mut t, &targets, fast());

        assert_eq!(r.failed, vec![20]);
        assert_eq!(r.sweep_failures, vec![("fishstrap".to_string(), "access denied".to_string())]);
    }

    #[test]
    fn no_matches_still_sweeps_every_target() {
        let mut t = FakeTable::with(&[(1, "svchost.exe")]);
        let targets = NameSet::substrings(&["a.exe", "b.exe"]);
        let r = terminate(&mut t, &targets, fast());
        assert!(r.matched.is_empty());
        assert!(t.close_requests.is_empty());
        assert_eq!(t.swept.len(), 2);
        assert_eq!(r.summary(), "0 matched, 0 closed, 0 killed, 0 still running");
    }
}
