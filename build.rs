//! Stamps build provenance for `/health`.
//!
//! `POMODORO_COMMIT` wins over git so source tarballs and container builds
//! without a `.git` directory can still report a revision.

use std::process::Command;

const COMMIT_OVERRIDE: &str = "POMODORO_COMMIT";

fn short_commit() -> Option<String> {
    if let Ok(commit) = std::env::var(COMMIT_OVERRIDE) {
        let commit = commit.trim();
        if !commit.is_empty() {
            return Some(commit.chars().take(12).collect());
        }
    }

    let output = Command::new("git")
        .args(["rev-parse", "--short=9", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())?;
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_owned()).filter(|h| !h.is_empty())
}

fn main() {
    let commit = short_commit().unwrap_or_else(|| "nogit".to_owned());
    let built_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    for (key, value) in [
        ("POMODORO_BUILD_COMMIT", commit.as_str()),
        ("POMODORO_BUILT_AT", built_at.as_str()),
    ] {
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rerun-if-env-changed={COMMIT_OVERRIDE}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
