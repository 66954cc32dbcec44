//! Builtin recipe catalog.
//!
//! Covers the tools the control plane itself drives. On-disk catalog
//! files may extend or shadow these definitions; the registry validates
//! the merged result either way, so every builtin handler pattern is
//! exercised against its example stderr in the test suite.

use std::collections::BTreeMap;

use opsdeck_profile::DistroFamily;

use crate::types::{
    FailureHandlerDef, LockCondition, MethodEntry, MethodFamily, RecipeDef, RemediationOptionDef,
    RemediationStrategy, Risk, ANY_PM,
};

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

fn any_cmd(parts: &[&str]) -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(ANY_PM.to_string(), argv(parts))])
}

fn no_sudo() -> BTreeMap<String, bool> {
    BTreeMap::from([(ANY_PM.to_string(), false)])
}

fn sudo() -> BTreeMap<String, bool> {
    BTreeMap::from([(ANY_PM.to_string(), true)])
}

fn method(family: MethodFamily, commands_by_pm: BTreeMap<String, Vec<String>>) -> MethodEntry {
    MethodEntry {
        family,
        commands_by_pm,
        needs_sudo_by_pm: BTreeMap::new(),
        binary_url_template: None,
        binary_archs: Vec::new(),
        post_env: BTreeMap::new(),
    }
}

fn pm_cmd(pm: &str, parts: &[&str]) -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(pm.to_string(), argv(parts))])
}

fn packages(family: DistroFamily, names: &[&str]) -> BTreeMap<DistroFamily, Vec<String>> {
    BTreeMap::from([(family, argv(names))])
}

/// The full builtin catalog.
#[must_use]
pub fn builtin_catalog() -> Vec<RecipeDef> {
    vec![
        ruff(),
        cargo_audit(),
        pipx(),
        rustup(),
        docker(),
        kubectl(),
        helm(),
        terraform(),
        gh(),
        jq(),
    ]
}

fn ruff() -> RecipeDef {
    RecipeDef {
        id: "ruff".to_string(),
        label: "Ruff".to_string(),
        category: "linting".to_string(),
        methods: vec![
            MethodEntry {
                needs_sudo_by_pm: no_sudo(),
                ..method(MethodFamily::Pip, any_cmd(&["pip", "install", "ruff"]))
            },
            MethodEntry {
                needs_sudo_by_pm: no_sudo(),
                ..method(MethodFamily::Pipx, any_cmd(&["pipx", "install", "ruff"]))
            },
            method(
                MethodFamily::Brew,
                pm_cmd("brew", &["brew", "install", "ruff"]),
            ),
        ],
        deps: Vec::new(),
        system_packages_by_family: BTreeMap::new(),
        verify: argv(&["ruff", "--version"]),
        step_timeout_secs: None,
        on_failure: vec![
            FailureHandlerDef {
                failure_id: "pep668".to_string(),
                category: "python-packaging".to_string(),
                label: "Externally managed environment".to_string(),
                description: "This Python installation refuses system-wide pip installs; \
                              the interpreter is managed by the OS package manager."
                    .to_string(),
                exit_code: None,
                pattern: "externally-managed-environment".to_string(),
                method_family: Some(MethodFamily::Pip),
                options: vec![
                    RemediationOptionDef {
                        id: "use_pipx".to_string(),
                        label: "Install via pipx".to_string(),
                        icon: "package".to_string(),
                        description: "Install into an isolated pipx environment.".to_string(),
                        strategy: RemediationStrategy::SwitchMethod {
                            family: MethodFamily::Pipx,
                        },
                        risk: Risk::Low,
                        recommended: true,
                        step_count_est: Some(2),
                        estimated_time: Some("~30s".to_string()),
                        lock_conditions: vec![LockCondition::RequiresTool {
                            tool: "pipx".to_string(),
                        }],
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                    RemediationOptionDef {
                        id: "use_venv".to_string(),
                        label: "Use a virtualenv".to_string(),
                        icon: "folder".to_string(),
                        description: "Create a project virtualenv and install there."
                            .to_string(),
                        strategy: RemediationStrategy::Manual {
                            instructions: "python3 -m venv .venv && .venv/bin/pip install ruff"
                                .to_string(),
                        },
                        risk: Risk::Low,
                        recommended: false,
                        step_count_est: None,
                        estimated_time: None,
                        lock_conditions: Vec::new(),
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                    RemediationOptionDef {
                        id: "break_system_packages".to_string(),
                        label: "Override the protection".to_string(),
                        icon: "alert-triangle".to_string(),
                        description: "Pass --break-system-packages to pip. Can conflict \
                                      with OS-managed Python packages."
                            .to_string(),
                        strategy: RemediationStrategy::RetryWithArgs {
                            extra_args: argv(&["--break-system-packages"]),
                        },
                        risk: Risk::Medium,
                        recommended: false,
                        step_count_est: Some(1),
                        estimated_time: Some("~15s".to_string()),
                        lock_conditions: Vec::new(),
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                    RemediationOptionDef {
                        id: "install_from_apt".to_string(),
                        label: "Install the distro package".to_string(),
                        icon: "box".to_string(),
                        description: "Use the native package instead of pip.".to_string(),
                        strategy: RemediationStrategy::SwitchMethod {
                            family: MethodFamily::Apt,
                        },
                        risk: Risk::Low,
                        recommended: false,
                        step_count_est: None,
                        estimated_time: None,
                        lock_conditions: vec![LockCondition::DeclaredLocked {
                            reason: "python3-ruff not available in Debian repos".to_string(),
                        }],
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                ],
                chain_forward: true,
                precludes_retry: false,
            },
            FailureHandlerDef {
                failure_id: "pip_missing".to_string(),
                category: "python-packaging".to_string(),
                label: "pip not found".to_string(),
                description: "No pip on PATH; the Python packaging tools are not installed."
                    .to_string(),
                exit_code: None,
                pattern: r"pip: command not found|No module named pip".to_string(),
                method_family: Some(MethodFamily::Pip),
                options: vec![
                    RemediationOptionDef {
                        id: "install_python_pip".to_string(),
                        label: "Install pip".to_string(),
                        icon: "download".to_string(),
                        description: "Install the distro's pip package, then retry."
                            .to_string(),
                        strategy: RemediationStrategy::InstallSystemPackages,
                        risk: Risk::Low,
                        recommended: true,
                        step_count_est: Some(2),
                        estimated_time: Some("~1m".to_string()),
                        lock_conditions: vec![LockCondition::RequiresSudo],
                        required_system_packages_by_family: BTreeMap::from([
                            (DistroFamily::Debian, argv(&["python3-pip"])),
                            (DistroFamily::Rhel, argv(&["python3-pip"])),
                            (DistroFamily::Alpine, argv(&["py3-pip"])),
                        ]),
                    },
                    RemediationOptionDef {
                        id: "use_pipx".to_string(),
                        label: "Install via pipx".to_string(),
                        icon: "package".to_string(),
                        description: "Skip pip entirely; use pipx.".to_string(),
                        strategy: RemediationStrategy::SwitchMethod {
                            family: MethodFamily::Pipx,
                        },
                        risk: Risk::Low,
                        recommended: false,
                        step_count_est: None,
                        estimated_time: None,
                        lock_conditions: vec![LockCondition::RequiresTool {
                            tool: "pipx".to_string(),
                        }],
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                ],
                chain_forward: true,
                precludes_retry: false,
            },
        ],
        example_stderr_by_failure_id: BTreeMap::from([
            (
                "pep668".to_string(),
                "error: externally-managed-environment\n\n\
                 × This environment is externally managed\n\
                 ╰─> To install Python packages system-wide, try apt install\n\
                 \u{20}   python3-xyz, where xyz is the package you are trying to install."
                    .to_string(),
            ),
            (
                "pip_missing".to_string(),
                "sh: 1: pip: command not found".to_string(),
            ),
        ]),
    }
}

fn cargo_audit() -> RecipeDef {
    RecipeDef {
        id: "cargo-audit".to_string(),
        label: "cargo-audit".to_string(),
        category: "security".to_string(),
        methods: vec![MethodEntry {
            needs_sudo_by_pm: no_sudo(),
            ..method(
                MethodFamily::Cargo,
                any_cmd(&["cargo", "install", "cargo-audit"]),
            )
        }],
        deps: argv(&["rustup"]),
        system_packages_by_family: BTreeMap::from([
            (
                DistroFamily::Debian,
                argv(&["pkg-config", "libssl-dev", "libcurl4-openssl-dev"]),
            ),
            (
                DistroFamily::Rhel,
                argv(&["pkgconf-pkg-config", "openssl-devel", "libcurl-devel"]),
            ),
            (
                DistroFamily::Alpine,
                argv(&["pkgconf", "openssl-dev", "curl-dev"]),
            ),
        ]),
        verify: argv(&["cargo-audit", "--version"]),
        step_timeout_secs: None,
        on_failure: vec![
            FailureHandlerDef {
                failure_id: "rustc_too_old".to_string(),
                category: "toolchain".to_string(),
                label: "Rust toolchain too old".to_string(),
                description: "The crate needs a newer rustc than the active toolchain."
                    .to_string(),
                exit_code: None,
                pattern: r"requires rustc \d+\.\d+(\.\d+)? or newer, while the currently active rustc version is"
                    .to_string(),
                method_family: Some(MethodFamily::Cargo),
                options: vec![
                    RemediationOptionDef {
                        id: "update_rust_via_rustup".to_string(),
                        label: "Update Rust via rustup".to_string(),
                        icon: "refresh-cw".to_string(),
                        description: "Update the stable toolchain, then retry.".to_string(),
                        strategy: RemediationStrategy::InstallPrereq {
                            tool: "rustup".to_string(),
                        },
                        risk: Risk::Low,
                        recommended: true,
                        step_count_est: Some(3),
                        estimated_time: Some("~2m".to_string()),
                        lock_conditions: Vec::new(),
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                    RemediationOptionDef {
                        id: "install_older_cargo_audit_version".to_string(),
                        label: "Pin an older cargo-audit".to_string(),
                        icon: "rewind".to_string(),
                        description: "Install the last release that supports this toolchain. \
                                      Misses newer advisories."
                            .to_string(),
                        strategy: RemediationStrategy::RetryWithArgs {
                            extra_args: argv(&["--version", "0.17.6"]),
                        },
                        risk: Risk::Medium,
                        recommended: false,
                        step_count_est: Some(1),
                        estimated_time: Some("~3m".to_string()),
                        lock_conditions: Vec::new(),
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                    RemediationOptionDef {
                        id: "use_distro_package".to_string(),
                        label: "Install the distro package".to_string(),
                        icon: "box".to_string(),
                        description: "Use a native package instead of cargo install."
                            .to_string(),
                        strategy: RemediationStrategy::SwitchMethod {
                            family: MethodFamily::Apt,
                        },
                        risk: Risk::Low,
                        recommended: false,
                        step_count_est: None,
                        estimated_time: None,
                        lock_conditions: vec![LockCondition::DeclaredLocked {
                            reason: "no matching apt package".to_string(),
                        }],
                        required_system_packages_by_family: BTreeMap::new(),
                    },
                ],
                chain_forward: true,
                precludes_retry: false,
            },
            FailureHandlerDef {
                failure_id: "linker_missing".to_string(),
                category: "toolchain".to_string(),
                label: "C linker missing".to_string(),
                description: "Native compilation needs a C toolchain that is not installed."
                    .to_string(),
                exit_code: None,
                pattern: r"linker `cc` not found".to_string(),
                method_family: None,
                options: vec![RemediationOptionDef {
                    id: "install_build_tools".to_string(),
                    label: "Install build tools".to_string(),
                    icon: "download".to_string(),
                    description: "Install the distro's C toolchain, then retry.".to_string(),
                    strategy: RemediationStrategy::InstallSystemPackages,
                    risk: Risk::Low,
                    recommended: true,
                    step_count_est: Some(2),
                    estimated_time: Some("~2m".to_string()),
                    lock_conditions: vec![LockCondition::RequiresSudo],
                    required_system_packages_by_family: BTreeMap::from([
                        (DistroFamily::Debian, argv(&["build-essential"])),
                        (DistroFamily::Rhel, argv(&["gcc", "make"])),
                        (DistroFamily::Alpine, argv(&["build-base"])),
                        (DistroFamily::Arch, argv(&["base-devel"])),
                    ]),
                }],
                chain_forward: false,
                precludes_retry: false,
            },
            FailureHandlerDef {
                failure_id: "openssl_headers_missing".to_string(),
                category: "toolchain".to_string(),
                label: "OpenSSL headers missing".to_string(),
                description: "openssl-sys cannot find the OpenSSL development headers."
                    .to_string(),
                exit_code: None,
                pattern: r"failed to run custom build command for `openssl-sys|Could not find directory of OpenSSL installation"
                    .to_string(),
                method_family: None,
                options: vec![RemediationOptionDef {
                    id: "install_openssl_headers".to_string(),
                    label: "Install OpenSSL headers".to_string(),
                    icon: "download".to_string(),
                    description: "Install the distro's OpenSSL dev package, then retry."
                        .to_string(),
                    strategy: RemediationStrategy::InstallSystemPackages,
                    risk: Risk::Low,
                    recommended: true,
                    step_count_est: Some(2),
                    estimated_time: Some("~1m".to_string()),
                    lock_conditions: vec![LockCondition::RequiresSudo],
                    required_system_packages_by_family: BTreeMap::from([
                        (DistroFamily::Debian, argv(&["libssl-dev", "pkg-config"])),
                        (DistroFamily::Rhel, argv(&["openssl-devel"])),
                        (DistroFamily::Alpine, argv(&["openssl-dev"])),
                    ]),
                }],
                chain_forward: false,
                precludes_retry: false,
            },
        ],
        example_stderr_by_failure_id: BTreeMap::from([
            (
                "rustc_too_old".to_string(),
                "error: cargo-audit v0.21.0 requires rustc 1.85 or newer, while the \
                 currently active rustc version is 1.75.0"
                    .to_string(),
            ),
            (
                "linker_missing".to_string(),
                "error: linker `cc` not found\n  |\n  = note: No such file or directory (os error 2)"
                    .to_string(),
            ),
            (
                "openssl_headers_missing".to_string(),
                "error: failed to run custom build command for `openssl-sys v0.9.99`"
                    .to_string(),
            ),
        ]),
    }
}

fn pipx() -> RecipeDef {
    RecipeDef {
        id: "pipx".to_string(),
        label: "pipx".to_string(),
        category: "python".to_string(),
        methods: vec![
            method(
                MethodFamily::Apt,
                pm_cmd("apt", &["apt-get", "install", "-y", "pipx"]),
            ),
            method(
                MethodFamily::Dnf,
                pm_cmd("dnf", &["dnf", "install", "-y", "pipx"]),
            ),
            method(
                MethodFamily::Brew,
                pm_cmd("brew", &["brew", "install", "pipx"]),
            ),
            MethodEntry {
                needs_sudo_by_pm: no_sudo(),
                ..method(
                    MethodFamily::Pip,
                    any_cmd(&["pip", "install", "--user", "pipx"]),
                )
            },
        ],
        deps: Vec::new(),
        system_packages_by_family: BTreeMap::new(),
        verify: argv(&["pipx", "--version"]),
        step_timeout_secs: None,
        on_failure: vec![FailureHandlerDef {
            failure_id: "pep668".to_string(),
            category: "python-packaging".to_string(),
            label: "Externally managed environment".to_string(),
            description: "pip refuses to install into the OS-managed interpreter."
                .to_string(),
            exit_code: None,
            pattern: "externally-managed-environment".to_string(),
            method_family: Some(MethodFamily::Pip),
            options: vec![RemediationOptionDef {
                id: "use_native_package".to_string(),
                label: "Install the distro package".to_string(),
                icon: "box".to_string(),
                description: "pipx ships as a native package on this distro.".to_string(),
                strategy: RemediationStrategy::SwitchMethod {
                    family: MethodFamily::Apt,
                },
                risk: Risk::Low,
                recommended: true,
                step_count_est: Some(2),
                estimated_time: Some("~30s".to_string()),
                lock_conditions: vec![LockCondition::RequiresSudo],
                required_system_packages_by_family: BTreeMap::new(),
            }],
            chain_forward: false,
            precludes_retry: false,
        }],
        example_stderr_by_failure_id: BTreeMap::from([(
            "pep668".to_string(),
            "error: externally-managed-environment".to_string(),
        )]),
    }
}

fn rustup() -> RecipeDef {
    RecipeDef {
        id: "rustup".to_string(),
        label: "rustup".to_string(),
        category: "toolchain".to_string(),
        methods: vec![
            MethodEntry {
                needs_sudo_by_pm: no_sudo(),
                post_env: BTreeMap::from([(
                    "PATH".to_string(),
                    "$HOME/.cargo/bin:$PATH".to_string(),
                )]),
                ..method(
                    MethodFamily::BashCurlScript,
                    any_cmd(&[
                        "sh",
                        "-c",
                        "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y --no-modify-path",
                    ]),
                )
            },
            method(
                MethodFamily::Brew,
                pm_cmd("brew", &["brew", "install", "rustup"]),
            ),
        ],
        deps: Vec::new(),
        system_packages_by_family: BTreeMap::from([
            (DistroFamily::Debian, argv(&["curl", "ca-certificates"])),
            (DistroFamily::Rhel, argv(&["curl", "ca-certificates"])),
            (DistroFamily::Alpine, argv(&["curl", "ca-certificates"])),
        ]),
        verify: argv(&["cargo", "--version"]),
        step_timeout_secs: None,
        on_failure: vec![FailureHandlerDef {
            failure_id: "curl_missing".to_string(),
            category: "bootstrap".to_string(),
            label: "curl not found".to_string(),
            description: "The installer script needs curl on PATH.".to_string(),
            exit_code: None,
            pattern: r"curl: command not found".to_string(),
            method_family: Some(MethodFamily::BashCurlScript),
            options: vec![RemediationOptionDef {
                id: "install_curl".to_string(),
                label: "Install curl".to_string(),
                icon: "download".to_string(),
                description: "Install curl from the distro, then retry.".to_string(),
                strategy: RemediationStrategy::InstallSystemPackages,
                risk: Risk::Low,
                recommended: true,
                step_count_est: Some(2),
                estimated_time: Some("~30s".to_string()),
                lock_conditions: vec![LockCondition::RequiresSudo],
                required_system_packages_by_family: BTreeMap::from([
                    (DistroFamily::Debian, argv(&["curl"])),
                    (DistroFamily::Rhel, argv(&["curl"])),
                    (DistroFamily::Alpine, argv(&["curl"])),
                    (DistroFamily::Arch, argv(&["curl"])),
                ]),
            }],
            chain_forward: false,
            precludes_retry: false,
        }],
        example_stderr_by_failure_id: BTreeMap::from([(
            "curl_missing".to_string(),
            "sh: 1: curl: command not found".to_string(),
        )]),
    }
}

fn docker() -> RecipeDef {
    RecipeDef {
        id: "docker".to_string(),
        label: "Docker Engine".to_string(),
        category: "infrastructure".to_string(),
        methods: vec![
            method(
                MethodFamily::Apt,
                pm_cmd("apt", &["apt-get", "install", "-y", "docker.io"]),
            ),
            method(
                MethodFamily::Dnf,
                pm_cmd("dnf", &["dnf", "install", "-y", "docker"]),
            ),
            MethodEntry {
                needs_sudo_by_pm: sudo(),
                ..method(
                    MethodFamily::BashCurlScript,
                    any_cmd(&["sh", "-c", "curl -fsSL https://get.docker.com | sh"]),
                )
            },
        ],
        deps: Vec::new(),
        system_packages_by_family: BTreeMap::new(),
        verify: argv(&["docker", "--version"]),
        step_timeout_secs: None,
        on_failure: vec![FailureHandlerDef {
            failure_id: "daemon_socket_denied".to_string(),
            category: "permissions".to_string(),
            label: "Docker socket permission denied".to_string(),
            description: "The daemon is installed but this user cannot reach its socket."
                .to_string(),
            exit_code: None,
            pattern: r"permission denied while trying to connect to the Docker daemon socket"
                .to_string(),
            method_family: None,
            options: vec![RemediationOptionDef {
                id: "add_user_to_docker_group".to_string(),
                label: "Join the docker group".to_string(),
                icon: "users".to_string(),
                description: "Grants this user daemon access. Effectively root-equivalent."
                    .to_string(),
                strategy: RemediationStrategy::Manual {
                    instructions: "sudo usermod -aG docker $USER && newgrp docker".to_string(),
                },
                risk: Risk::Medium,
                recommended: true,
                step_count_est: None,
                estimated_time: None,
                lock_conditions: vec![LockCondition::RequiresSudo],
                required_system_packages_by_family: BTreeMap::new(),
            }],
            chain_forward: false,
            precludes_retry: false,
        }],
        example_stderr_by_failure_id: BTreeMap::from([(
            "daemon_socket_denied".to_string(),
            "docker: permission denied while trying to connect to the Docker daemon socket \
             at unix:///var/run/docker.sock"
                .to_string(),
        )]),
    }
}

fn kubectl() -> RecipeDef {
    RecipeDef {
        id: "kubectl".to_string(),
        label: "kubectl".to_string(),
        category: "infrastructure".to_string(),
        methods: vec![
            method(
                MethodFamily::Brew,
                pm_cmd("brew", &["brew", "install", "kubectl"]),
            ),
            MethodEntry {
                needs_sudo_by_pm: sudo(),
                binary_url_template: Some(
                    "https://dl.k8s.io/release/stable/bin/linux/{arch}/kubectl".to_string(),
                ),
                binary_archs: argv(&["amd64", "arm64"]),
                ..method(
                    MethodFamily::BinaryDownload,
                    any_cmd(&[
                        "sh",
                        "-c",
                        "curl -fsSL -o /usr/local/bin/kubectl \"https://dl.k8s.io/release/$(curl -Ls https://dl.k8s.io/release/stable.txt)/bin/linux/$(uname -m | sed 's/x86_64/amd64/;s/aarch64/arm64/')/kubectl\" && chmod +x /usr/local/bin/kubectl",
                    ]),
                )
            },
        ],
        deps: Vec::new(),
        system_packages_by_family: packages(DistroFamily::Debian, &["curl", "ca-certificates"]),
        verify: argv(&["kubectl", "version", "--client"]),
        step_timeout_secs: None,
        on_failure: Vec::new(),
        example_stderr_by_failure_id: BTreeMap::new(),
    }
}

fn helm() -> RecipeDef {
    RecipeDef {
        id: "helm".to_string(),
        label: "Helm".to_string(),
        category: "infrastructure".to_string(),
        methods: vec![
            method(
                MethodFamily::Brew,
                pm_cmd("brew", &["brew", "install", "helm"]),
            ),
            MethodEntry {
                needs_sudo_by_pm: sudo(),
                ..method(
                    MethodFamily::BashCurlScript,
                    any_cmd(&[
                        "sh",
                        "-c",
                        "curl -fsSL https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3 | bash",
                    ]),
                )
            },
        ],
        deps: Vec::new(),
        system_packages_by_family: packages(DistroFamily::Debian, &["curl", "ca-certificates"]),
        verify: argv(&["helm", "version", "--short"]),
        step_timeout_secs: None,
        on_failure: Vec::new(),
        example_stderr_by_failure_id: BTreeMap::new(),
    }
}

fn terraform() -> RecipeDef {
    RecipeDef {
        id: "terraform".to_string(),
        label: "Terraform".to_string(),
        category: "infrastructure".to_string(),
        methods: vec![
            method(
                MethodFamily::Apt,
                pm_cmd("apt", &["apt-get", "install", "-y", "terraform"]),
            ),
            method(
                MethodFamily::Dnf,
                pm_cmd("dnf", &["dnf", "install", "-y", "terraform"]),
            ),
            method(
                MethodFamily::Brew,
                pm_cmd("brew", &["brew", "install", "hashicorp/tap/terraform"]),
            ),
            MethodEntry {
                needs_sudo_by_pm: sudo(),
                binary_url_template: Some(
                    "https://releases.hashicorp.com/terraform/1.9.8/terraform_1.9.8_linux_{arch}.zip"
                        .to_string(),
                ),
                binary_archs: argv(&["amd64", "arm64"]),
                ..method(
                    MethodFamily::BinaryDownload,
                    any_cmd(&[
                        "sh",
                        "-c",
                        "curl -fsSL -o /tmp/terraform.zip \"https://releases.hashicorp.com/terraform/1.9.8/terraform_1.9.8_linux_$(uname -m | sed 's/x86_64/amd64/;s/aarch64/arm64/').zip\" && unzip -o /tmp/terraform.zip -d /usr/local/bin",
                    ]),
                )
            },
        ],
        deps: Vec::new(),
        system_packages_by_family: packages(DistroFamily::Debian, &["curl", "unzip"]),
        verify: argv(&["terraform", "version"]),
        step_timeout_secs: None,
        on_failure: vec![FailureHandlerDef {
            failure_id: "apt_package_missing".to_string(),
            category: "packaging".to_string(),
            label: "Not in configured repos".to_string(),
            description: "Terraform ships from the HashiCorp repo, which is not configured."
                .to_string(),
            exit_code: Some(100),
            pattern: r"Unable to locate package terraform".to_string(),
            method_family: Some(MethodFamily::Apt),
            options: vec![RemediationOptionDef {
                id: "use_binary_download".to_string(),
                label: "Download the release binary".to_string(),
                icon: "download".to_string(),
                description: "Fetch the official binary from releases.hashicorp.com."
                    .to_string(),
                strategy: RemediationStrategy::SwitchMethod {
                    family: MethodFamily::BinaryDownload,
                },
                risk: Risk::Low,
                recommended: true,
                step_count_est: Some(2),
                estimated_time: Some("~1m".to_string()),
                lock_conditions: vec![LockCondition::RequiresSudo],
                required_system_packages_by_family: BTreeMap::new(),
            }],
            chain_forward: false,
            precludes_retry: false,
        }],
        example_stderr_by_failure_id: BTreeMap::from([(
            "apt_package_missing".to_string(),
            "E: Unable to locate package terraform".to_string(),
        )]),
    }
}

fn gh() -> RecipeDef {
    RecipeDef {
        id: "gh".to_string(),
        label: "GitHub CLI".to_string(),
        category: "scm".to_string(),
        methods: vec![
            method(
                MethodFamily::Apt,
                pm_cmd("apt", &["apt-get", "install", "-y", "gh"]),
            ),
            method(MethodFamily::Dnf, pm_cmd("dnf", &["dnf", "install", "-y", "gh"])),
            method(MethodFamily::Brew, pm_cmd("brew", &["brew", "install", "gh"])),
        ],
        deps: Vec::new(),
        system_packages_by_family: BTreeMap::new(),
        verify: argv(&["gh", "--version"]),
        step_timeout_secs: None,
        on_failure: Vec::new(),
        example_stderr_by_failure_id: BTreeMap::new(),
    }
}

fn jq() -> RecipeDef {
    RecipeDef {
        id: "jq".to_string(),
        label: "jq".to_string(),
        category: "utilities".to_string(),
        methods: vec![
            method(MethodFamily::Apt, pm_cmd("apt", &["apt-get", "install", "-y", "jq"])),
            method(MethodFamily::Dnf, pm_cmd("dnf", &["dnf", "install", "-y", "jq"])),
            method(MethodFamily::Apk, pm_cmd("apk", &["apk", "add", "jq"])),
            method(MethodFamily::Pacman, pm_cmd("pacman", &["pacman", "-S", "--noconfirm", "jq"])),
            method(MethodFamily::Brew, pm_cmd("brew", &["brew", "install", "jq"])),
        ],
        deps: Vec::new(),
        system_packages_by_family: BTreeMap::new(),
        verify: argv(&["jq", "--version"]),
        step_timeout_secs: None,
        on_failure: Vec::new(),
        example_stderr_by_failure_id: BTreeMap::new(),
    }
}
