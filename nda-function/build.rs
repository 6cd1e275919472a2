//! Build script for nda-function
//!
//! Sets the values of the startup banner that `nda-function` logs before
//! touching the warehouse:
//!
//! ```text
//! Starting nda-function v0.1.0 (3fa9c2d1 release, built 2026-10-17T09:12:44+02:00)
//! ```
//!
//! - `GIT_HASH`: short commit hash, `unknown` outside a git checkout
//! - `BUILD_PROFILE`: cargo profile (`debug` or `release`)
//! - `BUILD_TIMESTAMP`: local build time, RFC 3339 to the second
//!
//! No `rerun-if-changed` is emitted, so the script runs on every build and
//! the banner never reports a stale commit.

use std::process::Command;

fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let build_timestamp = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=BUILD_PROFILE={}", profile);
}
