//! Bounded host probes.
//!
//! Every probe is capped at one second. A probe that fails, times out, or
//! produces garbage yields `None`; detection as a whole never fails.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Per-probe timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a completed probe.
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

impl ProbeOutput {
    /// True if the probe exited 0.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run a command with the probe timeout, capturing output.
///
/// Returns `None` if the binary is missing, the spawn fails, or the
/// timeout elapses.
pub async fn run_probe(program: &str, args: &[&str]) -> Option<ProbeOutput> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(PROBE_TIMEOUT, child).await {
        Ok(Ok(output)) => Some(ProbeOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => {
            debug!("probe {program} failed to spawn: {e}");
            None
        }
        Err(_) => {
            debug!("probe {program} timed out after {PROBE_TIMEOUT:?}");
            None
        }
    }
}

/// Check whether a binary is reachable on PATH.
#[must_use]
pub fn on_path(binary: &str) -> bool {
    which::which(binary).is_ok()
}

/// Read a small file, tolerating absence.
#[must_use]
pub fn read_to_string_opt(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_probe_success() {
        let out = run_probe("sh", &["-c", "echo hello"]).await.unwrap();
        assert!(out.ok());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_probe_missing_binary() {
        assert!(run_probe("definitely-not-a-binary-423", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_run_probe_timeout() {
        let started = std::time::Instant::now();
        let out = run_probe("sh", &["-c", "sleep 5"]).await;
        assert!(out.is_none());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_run_probe_nonzero_exit() {
        let out = run_probe("sh", &["-c", "echo nope >&2; exit 3"]).await.unwrap();
        assert!(!out.ok());
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stderr.trim(), "nope");
    }

    #[test]
    fn test_on_path() {
        assert!(on_path("sh"));
        assert!(!on_path("definitely-not-a-binary-423"));
    }
}
