use std::io::{self, BufRead, Write};

use clap::Parser;
use log::{debug, error, info};
use zenith_fixer::elevation::{AssumeElevated, Elevation, SystemElevation};
use zenith_fixer::orchestrator::{Controller, Decision, Notice, Operator, Prompt, RunReport, StartOutcome};
use zenith_fixer::steps::{remediation_plan, Toolkit};
use zenith_fixer::{build_info, env_truthy, watch_wait};

#[cfg(windows)]
use windows_sys::Win32::System::Console::{GetConsoleProcessList, GetConsoleWindow};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    if !cfg!(windows) {
        eprintln!("Zenith Fixer supports Windows 10/11 only. Exiting.");
        std::process::exit(2);
    }

    let assume_yes = cli.yes || env_truthy("ZENITH_ASSUME_YES");
    let elevation: Box<dyn Elevation> = if cli.skip_elevation || env_truthy("ZENITH_SKIP_ELEVATION") {
        info!("Elevation check skipped; system repair steps may fail");
        Box::new(AssumeElevated)
    } else {
        Box::new(SystemElevation)
    };

    let kit = Toolkit::system(watch_wait());
    debug!("download watch deadline: {:?}", kit.watch_wait);
    let mut controller = Controller::new(elevation, remediation_plan(kit));
    let mut console = ConsoleOperator::new(assume_yes, cli.quiet);

    let code = match controller.start(&mut console) {
        StartOutcome::Started => match controller.pump(&mut console) {
            Some(report) => finish(&report, cli.json),
            None => 1,
        },
        StartOutcome::Declined => {
            info!("Cancelled by user");
            0
        }
        StartOutcome::Relaunched => 0,
        StartOutcome::ElevationFailed(_) | StartOutcome::WorkerFailed(_) => 1,
        StartOutcome::AlreadyRunning => 0,
    };
    drop(controller);

    if should_pause_on_exit() && !assume_yes {
        pause_console();
    }
    std::process::exit(code);
}

fn finish(report: &RunReport, json: bool) -> i32 {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{}", s),
            Err(e) => error!("failed to serialize run report: {}", e),
        }
    }
    if report.aborted.is_some() { 1 } else { 0 }
}

// ---------- CLI ----------

#[derive(Debug, Parser)]
#[command(name = "zenith-fixer", version, author, about = "One-shot Roblox repair for Windows 10/11")]
struct Cli {
    /// Answer yes to every prompt (also ZENITH_ASSUME_YES)
    #[arg(long, short = 'y')]
    yes: bool,

    /// Run without requiring administrator rights (also ZENITH_SKIP_ELEVATION)
    #[arg(long)]
    skip_elevation: bool,

    /// Print the final run report as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (overrides quiet)
    #[arg(long)]
    verbose: bool,

    /// Silence most output
    #[arg(long)]
    quiet: bool,
}

fn init_logging(quiet: bool, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env).is_test(false).try_init();
    debug!("Logger initialized with level: {}", default_level);
    info!("Starting {}", build_info());
}

// ---------- Console presentation ----------

struct ConsoleOperator {
    assume_yes: bool,
    quiet: bool,
    last_progress: Option<u8>,
}

impl ConsoleOperator {
    fn new(assume_yes: bool, quiet: bool) -> Self {
        Self { assume_yes, quiet, last_progress: None }
    }
}

impl Operator for ConsoleOperator {
    fn append_log(&mut self, line: &str) {
        if !self.quiet {
            println!("{}", line);
        }
    }

    fn set_progress(&mut self, value: u8) {
        if self.last_progress == Some(value) {
            return;
        }
        self.last_progress = Some(value);
        if !self.quiet {
            println!("[{:>3}%]", value);
        }
    }

    fn ask(&mut self, prompt: Prompt) -> Decision {
        println!("\n== {} ==\n{}", prompt.title(), prompt.message());
        if self.assume_yes {
            println!("[y/N] y (assumed)");
            return Decision::Accept;
        }
        let _ = write!(io::stdout(), "[y/N] ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => Decision::Cancel,
            Ok(_) => parse_answer(&line),
        }
    }

    fn notify(&mut self, notice: Notice) {
        if notice.is_error {
            eprintln!("\n{}: {}", notice.title, notice.message);
        } else {
            println!("\n{}: {}", notice.title, notice.message);
        }
    }
}

fn parse_answer(line: &str) -> Decision {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Accept,
        _ => Decision::Decline,
    }
}

// ---------- Console pause logic (Windows) ----------

/// True when this process owns its console, i.e. it was started by double-click.
#[cfg(windows)]
fn should_pause_on_exit() -> bool {
    unsafe {
        let hwnd = GetConsoleWindow();
        if hwnd.is_null() {
            return false;
        }
        // Only this process attached: launched from Explorer, not a shell.
        let mut list: [u32; 2] = [0; 2];
        let count = GetConsoleProcessList(list.as_mut_ptr(), list.len() as u32);
        count <= 1
    }
}

/// Keep the console open until Enter so the log stays readable.
#[cfg(windows)]
fn pause_console() {
    let _ = write!(io::stdout(), "\nPress Enter to exit . . . ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);
}

#[cfg(not(windows))]
fn should_pause_on_exit() -> bool { false }

#[cfg(not(windows))]
fn pause_console() {}

// ---------- Tests ----------

#[cfg(test)]
mod tests {
    use super::*;
    use zenith_fixer::orchestrator::{StepRecord, StepStatus};

    #[test]
    fn answers_default_to_decline() {
        assert_eq!(parse_answer("y\n"), Decision::Accept);
        assert_eq!(parse_answer(" YES \r\n"), Decision::Accept);
        assert_eq!(parse_answer("\n"), Decision::Decline);
        assert_eq!(parse_answer("nope"), Decision::Decline);
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::try_parse_from(["zenith-fixer", "-y", "--json", "--skip-elevation"]).unwrap();
        assert!(cli.yes && cli.json && cli.skip_elevation);
        assert!(!cli.verbose && !cli.quiet);
        assert!(Cli::try_parse_from(["zenith-fixer", "--dry-run"]).is_err());
    }

    #[test]
    fn exit_code_follows_abort() {
        let mut report = RunReport {
            steps: vec![StepRecord { description: "x".into(), status: StepStatus::Completed, detail: String::new() }],
            final_progress: 100,
            aborted: None,
        };
        assert_eq!(finish(&report, false), 0);
        report.aborted = Some("x".into());
        assert_eq!(finish(&report, false), 1);
    }
}
