//! Sudo driver.
//!
//! Wraps privileged commands in the right sudo invocation and owns the
//! single rule that matters: the operator's secret goes to the child's
//! stdin exactly once, and nowhere else. It is never logged, never placed
//! in argv, never written to disk, and scrubbed from any output line that
//! happens to echo it.

/// How the executor must feed the child's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinFeed {
    /// Leave stdin closed.
    Closed,
    /// Write the secret followed by a newline, once, then close.
    SecretOnce,
}

/// A command prepared for execution, possibly wrapped in sudo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    /// Final argv.
    pub argv: Vec<String>,
    /// Stdin behavior.
    pub stdin: StdinFeed,
}

/// Wrap an argv for execution.
///
/// Elevation cases, in order:
/// - step does not need sudo, or the operator is root: run as-is;
/// - passwordless sudo: `sudo -n`, stdin stays closed;
/// - a secret was supplied: `sudo -S` with an empty prompt, secret piped
///   to stdin exactly once;
/// - `SUDO_ASKPASS` is configured: `sudo -A`, the helper collects the
///   password out-of-band;
/// - otherwise `sudo -n`, which fails fast with a classifiable error
///   instead of hanging on a hidden prompt.
#[must_use]
pub fn prepare_command(
    argv: &[String],
    needs_sudo: bool,
    is_root: bool,
    passwordless_sudo: bool,
    have_secret: bool,
) -> PreparedCommand {
    if !needs_sudo || is_root {
        return PreparedCommand {
            argv: argv.to_vec(),
            stdin: StdinFeed::Closed,
        };
    }

    if passwordless_sudo {
        return PreparedCommand {
            argv: wrap(&["sudo", "-n", "--"], argv),
            stdin: StdinFeed::Closed,
        };
    }

    if have_secret {
        return PreparedCommand {
            argv: wrap(&["sudo", "-S", "-p", "", "--"], argv),
            stdin: StdinFeed::SecretOnce,
        };
    }

    if std::env::var_os("SUDO_ASKPASS").is_some() {
        return PreparedCommand {
            argv: wrap(&["sudo", "-A", "--"], argv),
            stdin: StdinFeed::Closed,
        };
    }

    PreparedCommand {
        argv: wrap(&["sudo", "-n", "--"], argv),
        stdin: StdinFeed::Closed,
    }
}

fn wrap(prefix: &[&str], argv: &[String]) -> Vec<String> {
    prefix
        .iter()
        .map(|s| (*s).to_string())
        .chain(argv.iter().cloned())
        .collect()
}

/// Scrub the secret from a line of child output.
///
/// Children should never see the secret on their output, but a
/// misbehaving sudo configuration or an echoing shell must not leak it
/// into the event stream or the audit trail.
#[must_use]
pub fn redact_secret(line: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() && line.contains(secret) => {
            line.replace(secret, "********")
        }
        _ => line.to_string(),
    }
}
