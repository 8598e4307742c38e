//! Remediation Orchestrator.
//!
//! A [`Controller`] owned by the foreground thread moves through
//! Idle -> Confirming -> Running -> Idle. Once confirmed, the step list runs
//! on one background worker that talks back only through a bounded channel
//! of [`RunEvent`]s; the foreground renders them and answers prompts.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::elevation::Elevation;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Confirming,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Elevation,
    ConfirmActions,
    DnsChange,
}

impl Prompt {
    pub fn title(self) -> &'static str {
        match self {
            Prompt::Elevation => "Elevation required",
            Prompt::ConfirmActions => "Confirm actions",
            Prompt::DnsChange => "Change DNS to 1.1.1.1?",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Prompt::Elevation => "This will make system-level changes.\n\nAdministrator rights are required. Continue?",
            Prompt::ConfirmActions => {
                "This will:\n \
                 - Repair Windows system files and components\n \
                 - Add Windows Defender exclusions for 'zenith' files and folders in Downloads, Desktop and OneDrive\n \
                 - Back up, delete and restore Roblox data in LocalAppData (also removes fishstrap and bloxstrap)\n \
                 - Reinstall Roblox per-user\n\nProceed?"
            }
            Prompt::DnsChange => {
                "Changing your DNS to 1.1.1.1.\n\nIf you are on a school or work computer/laptop please decline this DNS \
                 change as it may get you in trouble from your school or work company."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub is_error: bool,
}

/// The presentation layer: log pane, progress bar, dialogs.
pub trait Operator {
    fn append_log(&mut self, line: &str);
    fn set_progress(&mut self, value: u8);
    fn ask(&mut self, prompt: Prompt) -> Decision;
    fn notify(&mut self, notice: Notice);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed(String),
    /// Logged; the run continues.
    Recoverable(String),
    /// Stops the run after this step.
    Fatal(String),
}

impl StepOutcome {
    pub fn done() -> Self {
        StepOutcome::Completed(String::new())
    }
}

type StepAction = Box<dyn FnOnce(&mut StepContext) -> StepOutcome + Send>;

pub struct Step {
    pub description: String,
    /// Cumulative progress (0-100) reached when this step finishes.
    pub progress: u8,
    action: StepAction,
}

impl Step {
    pub fn new<F>(description: &str, progress: u8, action: F) -> Self
    where
        F: FnOnce(&mut StepContext) -> StepOutcome + Send + 'static,
    {
        Self { description: description.to_string(), progress, action: Box::new(action) }
    }
}

/// Builds the fixed step list at the start of every run.
pub type Plan = Box<dyn Fn() -> Vec<Step> + Send>;

pub struct PromptRequest {
    pub prompt: Prompt,
    reply: SyncSender<Decision>,
}

impl PromptRequest {
    pub fn answer(self, decision: Decision) {
        let _ = self.reply.send(decision);
    }
}

pub enum RunEvent {
    Log(String),
    Progress(u8),
    Prompt(PromptRequest),
    Finished(RunReport),
}

/// The worker's handle to the foreground.
pub struct StepContext {
    tx: SyncSender<RunEvent>,
}

impl StepContext {
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line.trim_start());
        let _ = self.tx.send(RunEvent::Log(line));
    }

    fn progress(&mut self, value: u8) {
        let _ = self.tx.send(RunEvent::Progress(value));
    }

    /// Blocks until the foreground answers. A vanished foreground counts as
    /// `Cancel`.
    pub fn ask(&mut self, prompt: Prompt) -> Decision {
        let (reply, answer) = mpsc::sync_channel(1);
        if self.tx.send(RunEvent::Prompt(PromptRequest { prompt, reply })).is_err() {
            return Decision::Cancel;
        }
        answer.recv().unwrap_or(Decision::Cancel)
    }

    /// A context whose events are collected instead of rendered.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<RunEvent>) {
        let (tx, rx) = mpsc::sync_channel(4096);
        (Self { tx }, rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Recoverable,
    Fatal,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub description: String,
    pub status: StepStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepRecord>,
    pub final_progress: u8,
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn notice(&self) -> Notice {
        if let Some(reason) = &self.aborted {
            return Notice {
                title: "Stopped".into(),
                message: format!("Fix stopped early: {}\n\nPlease restart your PC.", reason),
                is_error: true,
            };
        }
        let warnings: Vec<&StepRecord> = self.steps.iter().filter(|s| s.status == StepStatus::Recoverable).collect();
        let message = if warnings.is_empty() {
            "Fix completed.\n\nPlease restart your PC.".to_string()
        } else {
            let mut m = format!("Fix completed with {} warning(s):\n", warnings.len());
            for w in warnings {
                m.push_str(&format!(" - {} {}\n", w.description, w.detail));
            }
            m.push_str("\nPlease restart your PC.");
            m
        };
        Notice { title: "Done".into(), message, is_error: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Declined,
    /// An elevated instance was started; this process should exit.
    Relaunched,
    ElevationFailed(String),
    WorkerFailed(String),
    Started,
}

pub struct Controller {
    state: RunState,
    progress: u8,
    elevation: Box<dyn Elevation>,
    plan: Plan,
    worker: Option<JoinHandle<()>>,
    events: Option<Receiver<RunEvent>>,
}

impl Controller {
    pub fn new(elevation: Box<dyn Elevation>, plan: Plan) -> Self {
        Self { state: RunState::Idle, progress: 0, elevation, plan, worker: None, events: None }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != RunState::Idle
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Confirm, then spawn the worker. Ignored while a run is active.
    pub fn start(&mut self, op: &mut dyn Operator) -> StartOutcome {
        if self.is_running() {
            debug!("start ignored: run already active");
            return StartOutcome::AlreadyRunning;
        }
        self.state = RunState::Confirming;

        if !self.elevation.is_elevated() {
            if op.ask(Prompt::Elevation) != Decision::Accept {
                self.state = RunState::Idle;
                return StartOutcome::Declined;
            }
            self.state = RunState::Idle;
            return match self.elevation.relaunch_elevated() {
                Ok(()) => {
                    info!("Relaunched elevated; exiting this instance");
                    StartOutcome::Relaunched
                }
                Err(e) => {
                    error!("Failed to relaunch elevated: {}", e);
                    op.notify(Notice {
                        title: "Error".into(),
                        message: format!("Failed to relaunch elevated.\n\n{}", e),
                        is_error: true,
                    });
                    StartOutcome::ElevationFailed(e.to_string())
                }
            };
        }

        if op.ask(Prompt::ConfirmActions) != Decision::Accept {
            self.state = RunState::Idle;
            return StartOutcome::Declined;
        }

        let steps = (self.plan)();
        let (tx, rx) = mpsc::sync_channel(EVENT_CAPACITY);
        let spawned = thread::Builder::new().name("remediation".into()).spawn(move || run_steps(steps, tx));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.events = Some(rx);
                self.state = RunState::Running;
                self.progress = 0;
                op.set_progress(0);
                StartOutcome::Started
            }
            Err(e) => {
                error!("Failed to start worker: {}", e);
                self.state = RunState::Idle;
                op.notify(Notice { title: "Error".into(), message: format!("Failed to start: {}", e), is_error: true });
                StartOutcome::WorkerFailed(e.to_string())
            }
        }
    }

    /// Render worker events until the run finishes. Returns `None` when no
    /// run is active.
    pub fn pump(&mut self, op: &mut dyn Operator) -> Option<RunReport> {
        let rx = self.events.take()?;
        let report = loop {
            match rx.recv() {
                Ok(RunEvent::Log(line)) => op.append_log(&line),
                Ok(RunEvent::Progress(p)) => {
                    self.progress = self.progress.max(p.min(100));
                    op.set_progress(self.progress);
                }
                Ok(RunEvent::Prompt(req)) => {
                    let decision = op.ask(req.prompt);
                    req.answer(decision);
                }
                Ok(RunEvent::Finished(report)) => break report,
                Err(_) => {
                    warn!("worker exited without a report");
                    break RunReport {
                        final_progress: self.progress,
                        aborted: Some("worker stopped unexpectedly".into()),
                        ..RunReport::default()
                    };
                }
            }
        };
        self.join_worker();
        self.state = RunState::Idle;
        op.notify(report.notice());
        Some(report)
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("remediation worker panicked");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // Dropping the receiver makes every remaining prompt resolve to Cancel.
        self.events.take();
        self.join_worker();
    }
}

fn run_steps(steps: Vec<Step>, tx: SyncSender<RunEvent>) {
    let mut ctx = StepContext { tx };
    let mut report = RunReport::default();
    let mut progress = 0u8;
    let mut steps = steps.into_iter();

    for step in steps.by_ref() {
        ctx.log(step.description.clone());
        let outcome = (step.action)(&mut ctx);
        let (status, detail) = match outcome {
            StepOutcome::Completed(d) => (StepStatus::Completed, d),
            StepOutcome::Recoverable(d) => {
                ctx.log(format!(" Warning: {}", d));
                (StepStatus::Recoverable, d)
            }
            StepOutcome::Fatal(d) => {
                ctx.log(format!(" Error: {}", d));
                (StepStatus::Fatal, d)
            }
        };
        progress = progress.max(step.progress.min(100));
        ctx.progress(progress);
        report.steps.push(StepRecord { description: step.description, status, detail });
        if status == StepStatus::Fatal {
            report.aborted = report.steps.last().map(|s| s.description.clone());
            break;
        }
    }
    for step in steps {
        report.steps.push(StepRecord { description: step.description, status: StepStatus::Skipped, detail: String::new() });
    }

    if report.aborted.is_none() {
        progress = 100;
        ctx.log("All steps complete. Please restart your PC.");
        ctx.progress(progress);
    }
    report.final_progress = progress;
    let _ = ctx.tx.send(RunEvent::Finished(report));
}
