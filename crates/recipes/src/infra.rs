//! Infrastructure failure handlers.
//!
//! Cross-cutting failure classes matched after every recipe-level handler
//! misses: disk full, OOM kills, network trouble, package-manager locks,
//! permission and sudo problems. These apply to any tool being installed.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::types::{
    FailureHandlerDef, LockCondition, RemediationOptionDef, RemediationStrategy, Risk,
};

/// A compiled infrastructure handler.
#[derive(Debug)]
pub struct InfraHandler {
    /// The handler definition.
    pub def: FailureHandlerDef,
    /// Compiled `def.pattern`.
    pub regex: Regex,
}

/// Global infrastructure handler table, in match order.
pub static INFRA_HANDLERS: LazyLock<Vec<InfraHandler>> = LazyLock::new(|| {
    infra_handler_defs()
        .into_iter()
        .map(|def| {
            let regex = Regex::new(&def.pattern)
                .unwrap_or_else(|e| panic!("infra handler '{}' pattern: {e}", def.failure_id));
            InfraHandler { def, regex }
        })
        .collect()
});

fn manual_option(id: &str, label: &str, instructions: &str, risk: Risk) -> RemediationOptionDef {
    RemediationOptionDef {
        id: id.to_string(),
        label: label.to_string(),
        icon: "terminal".to_string(),
        description: instructions.to_string(),
        strategy: RemediationStrategy::Manual {
            instructions: instructions.to_string(),
        },
        risk,
        recommended: false,
        step_count_est: None,
        estimated_time: None,
        lock_conditions: Vec::new(),
        required_system_packages_by_family: BTreeMap::new(),
    }
}

fn retry_option(id: &str, label: &str, description: &str) -> RemediationOptionDef {
    RemediationOptionDef {
        id: id.to_string(),
        label: label.to_string(),
        icon: "refresh-cw".to_string(),
        description: description.to_string(),
        strategy: RemediationStrategy::RetrySameMethod,
        risk: Risk::Low,
        recommended: false,
        step_count_est: None,
        estimated_time: None,
        lock_conditions: Vec::new(),
        required_system_packages_by_family: BTreeMap::new(),
    }
}

fn infra_handler_defs() -> Vec<FailureHandlerDef> {
    vec![
        FailureHandlerDef {
            failure_id: "disk_full".to_string(),
            category: "infra".to_string(),
            label: "Disk full".to_string(),
            description: "The filesystem has no space left; nothing installs until space \
                          is reclaimed."
                .to_string(),
            exit_code: None,
            pattern: r"No space left on device|ENOSPC".to_string(),
            method_family: None,
            options: vec![
                {
                    let mut o = manual_option(
                        "free_disk_space",
                        "Free disk space",
                        "Remove unused files or packages (e.g. apt-get clean, docker system prune), then retry.",
                        Risk::Low,
                    );
                    o.recommended = true;
                    o
                },
            ],
            chain_forward: false,
            precludes_retry: true,
        },
        FailureHandlerDef {
            failure_id: "oom_killed".to_string(),
            category: "infra".to_string(),
            label: "Killed: out of memory".to_string(),
            description: "The kernel killed the install process for exceeding available \
                          memory."
                .to_string(),
            exit_code: Some(137),
            pattern: r"Killed|signal 9|out of memory".to_string(),
            method_family: None,
            options: vec![
                {
                    let mut o = retry_option(
                        "retry_after_freeing_memory",
                        "Retry",
                        "Close memory-heavy processes and run the step again.",
                    );
                    o.recommended = true;
                    o
                },
                manual_option(
                    "add_swap",
                    "Add swap space",
                    "Add a temporary swap file to survive compilation peaks.",
                    Risk::Medium,
                ),
            ],
            chain_forward: false,
            precludes_retry: false,
        },
        FailureHandlerDef {
            failure_id: "network_unreachable".to_string(),
            category: "infra".to_string(),
            label: "Network error".to_string(),
            description: "Name resolution or connectivity failed while downloading."
                .to_string(),
            exit_code: None,
            pattern: r"Could not resolve host|Temporary failure in name resolution|Connection timed out|Network is unreachable|Could not resolve hostname"
                .to_string(),
            method_family: None,
            options: vec![
                {
                    let mut o = retry_option(
                        "retry_download",
                        "Retry",
                        "Transient network failures usually clear on retry.",
                    );
                    o.recommended = true;
                    o
                },
                manual_option(
                    "check_proxy",
                    "Check proxy settings",
                    "Verify HTTP(S)_PROXY and DNS configuration, then retry.",
                    Risk::Low,
                ),
            ],
            chain_forward: false,
            precludes_retry: false,
        },
        FailureHandlerDef {
            failure_id: "pm_locked".to_string(),
            category: "infra".to_string(),
            label: "Package manager busy".to_string(),
            description: "Another process holds the package-manager lock.".to_string(),
            exit_code: None,
            pattern: r"Could not get lock /var/lib/dpkg/lock|Could not get lock /var/lib/apt/lists/lock|Waiting for cache lock|another process is using the packaging system"
                .to_string(),
            method_family: None,
            options: vec![{
                let mut o = retry_option(
                    "retry_after_lock",
                    "Retry",
                    "Wait for the other package operation to finish, then retry.",
                );
                o.recommended = true;
                o
            }],
            chain_forward: false,
            precludes_retry: false,
        },
        FailureHandlerDef {
            failure_id: "permission_denied".to_string(),
            category: "infra".to_string(),
            label: "Permission denied".to_string(),
            description: "The step wrote somewhere this user cannot write.".to_string(),
            exit_code: None,
            pattern: r"(?i)permission denied".to_string(),
            method_family: None,
            options: vec![
                RemediationOptionDef {
                    id: "retry_with_sudo".to_string(),
                    label: "Retry with sudo".to_string(),
                    icon: "shield".to_string(),
                    description: "Re-run the failed step with elevated privileges."
                        .to_string(),
                    strategy: RemediationStrategy::RetryWithSudoSecret,
                    risk: Risk::Medium,
                    recommended: true,
                    step_count_est: Some(1),
                    estimated_time: None,
                    lock_conditions: vec![LockCondition::RequiresSudo],
                    required_system_packages_by_family: BTreeMap::new(),
                },
            ],
            chain_forward: false,
            precludes_retry: false,
        },
        FailureHandlerDef {
            failure_id: "sudo_missing".to_string(),
            category: "infra".to_string(),
            label: "sudo not installed".to_string(),
            description: "The step needs elevation but sudo is not on PATH.".to_string(),
            exit_code: None,
            pattern: r"sudo: command not found|sudo: not found".to_string(),
            method_family: None,
            options: vec![
                manual_option(
                    "install_sudo_as_root",
                    "Install sudo as root",
                    "Become root (su -) and install the sudo package, then retry.",
                    Risk::Medium,
                ),
            ],
            chain_forward: false,
            precludes_retry: false,
        },
        FailureHandlerDef {
            failure_id: "sudo_auth_failed".to_string(),
            category: "infra".to_string(),
            label: "Wrong sudo password".to_string(),
            description: "sudo rejected the supplied password.".to_string(),
            exit_code: Some(1),
            pattern: r"Sorry, try again|incorrect password attempt".to_string(),
            method_family: None,
            options: vec![RemediationOptionDef {
                id: "retry_with_password".to_string(),
                label: "Retry with password".to_string(),
                icon: "key".to_string(),
                description: "Re-enter the sudo password and run the step again."
                    .to_string(),
                strategy: RemediationStrategy::RetryWithSudoSecret,
                risk: Risk::Low,
                recommended: true,
                step_count_est: Some(1),
                estimated_time: None,
                lock_conditions: vec![LockCondition::RequiresSudo],
                required_system_packages_by_family: BTreeMap::new(),
            }],
            chain_forward: false,
            precludes_retry: false,
        },
    ]
}

/// Example stderr per infra failure id, exercised by the test suite the
/// same way recipe examples are validated by the registry.
#[must_use]
pub fn infra_example_stderr() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        (
            "disk_full",
            "tar: ./lib/librustc_driver.so: Wrote only 2048 of 10240 bytes\n\
             tar: Error is not recoverable: exiting now\n\
             write /usr/lib/cargo: No space left on device",
        ),
        ("oom_killed", "c++: fatal error: Killed signal terminated program cc1plus"),
        (
            "network_unreachable",
            "curl: (6) Could not resolve host: sh.rustup.rs",
        ),
        (
            "pm_locked",
            "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 4132 (apt)",
        ),
        (
            "permission_denied",
            "error: could not create '/usr/lib/python3.11/site-packages': Permission denied",
        ),
        ("sudo_missing", "sh: 1: sudo: command not found"),
        ("sudo_auth_failed", "Sorry, try again.\nsudo: 3 incorrect password attempts"),
    ])
}
