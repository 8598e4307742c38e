use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");

    let commit = git(&["rev-parse", "--short=12", "HEAD"])
        .or_else(|| env::var("GITHUB_SHA").ok().map(|s| s.chars().take(12).collect()))
        .unwrap_or_else(|| "unknown".to_string());
    let describe = git(&["describe", "--tags", "--always", "--dirty"]).unwrap_or_else(|| "untagged".to_string());
    let built = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string());
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

    for (key, value) in [
        ("GIT_COMMIT", commit),
        ("GIT_DESCRIBE", describe),
        ("BUILD_UNIX_TIME", built),
        ("BUILD_TARGET", target),
    ] {
        println!("cargo:rustc-env={}={}", key, value);
    }
}
