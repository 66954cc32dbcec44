//! Full host detection.
//!
//! [`detect`] assembles a [`SystemProfile`] from bounded probes. Each probe
//! contributes `unknown` on failure; the assembly itself cannot fail.

use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

use crate::distro;
use crate::probe::{on_path, read_to_string_opt, run_probe};
use crate::types::{
    Capabilities, ContainerInfo, DistroFamily, DistroInfo, LibcType, LibraryInfo, OsKind,
    PackageManager, PackageManagerInfo, SystemProfile, normalize_arch,
};

/// Detect the current host and produce an immutable profile.
///
/// Idempotent and side-effect free. Typical wall time is well under
/// 500ms; each individual probe is capped at one second.
pub async fn detect() -> SystemProfile {
    let system = OsKind::current();

    let kernel = run_probe("uname", &["-r"]).await.and_then(|o| {
        let s = o.stdout.trim().to_string();
        (!s.is_empty()).then_some(s)
    });
    let machine = run_probe("uname", &["-m"]).await.and_then(|o| {
        let s = o.stdout.trim().to_string();
        (!s.is_empty()).then_some(s)
    });
    let arch = normalize_arch(machine.as_deref().unwrap_or(std::env::consts::ARCH));

    let distro = detect_distro(system);
    let container = detect_container();
    let capabilities = detect_capabilities().await;
    let package_manager = detect_package_managers(&capabilities);
    let libraries = detect_libraries(system).await;

    debug!(
        "host profile: {:?}/{} arch={} pm={} container={}",
        system, distro.id, arch, package_manager.primary, container.in_container
    );

    SystemProfile {
        system,
        kernel,
        machine,
        arch,
        distro,
        container,
        capabilities,
        package_manager,
        libraries,
    }
}

fn detect_distro(system: OsKind) -> DistroInfo {
    match system {
        OsKind::Linux => read_to_string_opt(Path::new("/etc/os-release"))
            .map(|contents| distro::parse_os_release(&contents))
            .unwrap_or_else(DistroInfo::unknown),
        OsKind::Darwin => DistroInfo {
            id: "macos".to_string(),
            family: DistroFamily::Macos,
            version: None,
            version_tuple: Vec::new(),
        },
        OsKind::Windows => DistroInfo {
            id: "windows".to_string(),
            family: DistroFamily::Windows,
            version: None,
            version_tuple: Vec::new(),
        },
        OsKind::Unknown => DistroInfo::unknown(),
    }
}

fn detect_container() -> ContainerInfo {
    let dockerenv = Path::new("/.dockerenv").exists();
    let cgroup = read_to_string_opt(Path::new("/proc/1/cgroup")).unwrap_or_default();
    let runtime = container_runtime_from_cgroup(&cgroup);
    let in_container = dockerenv || runtime.is_some();
    let in_k8s = std::env::var_os("KUBERNETES_SERVICE_HOST").is_some();

    ContainerInfo {
        in_container,
        runtime: runtime.map(str::to_string).or_else(|| {
            // /.dockerenv alone still identifies the runtime.
            dockerenv.then(|| "docker".to_string())
        }),
        in_k8s,
        // Pods without a persistent volume and throwaway containers lose
        // installs on restart; surfaced as an advisory on plans.
        ephemeral: in_k8s || dockerenv,
    }
}

fn container_runtime_from_cgroup(cgroup: &str) -> Option<&'static str> {
    if cgroup.contains("kubepods") {
        Some("kubernetes")
    } else if cgroup.contains("docker") {
        Some("docker")
    } else if cgroup.contains("containerd") {
        Some("containerd")
    } else {
        None
    }
}

async fn detect_capabilities() -> Capabilities {
    let is_root = effective_uid() == Some(0);
    let has_sudo = on_path("sudo");

    // systemd counts only when the manager answers; "offline" means a
    // chroot or container carrying the binary without the init system.
    let has_systemd = if on_path("systemctl") {
        match run_probe("systemctl", &["is-system-running"]).await {
            Some(out) => out.stdout.trim() != "offline",
            None => false,
        }
    } else {
        false
    };

    let passwordless_sudo = if has_sudo {
        run_probe("sudo", &["-n", "true"]).await.is_some_and(|o| o.ok())
    } else {
        false
    };

    Capabilities {
        has_systemd,
        has_sudo,
        passwordless_sudo,
        is_root,
    }
}

fn effective_uid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        Some(unsafe { libc::geteuid() })
    }
    #[cfg(not(unix))]
    {
        None
    }
}

fn detect_package_managers(capabilities: &Capabilities) -> PackageManagerInfo {
    let mut available = BTreeSet::new();
    let mut primary = PackageManager::None;

    for pm in PackageManager::probe_order() {
        if on_path(pm.probe_binary()) {
            if primary == PackageManager::None {
                primary = *pm;
            }
            available.insert(*pm);
        }
    }

    let snap_available = on_path("snap") && capabilities.has_systemd;

    PackageManagerInfo {
        primary,
        available,
        snap_available,
    }
}

async fn detect_libraries(system: OsKind) -> LibraryInfo {
    let openssl_version = run_probe("openssl", &["version"]).await.and_then(|o| {
        // "OpenSSL 3.0.11 19 Sep 2023" -> "3.0.11"
        o.stdout.split_whitespace().nth(1).map(str::to_string)
    });

    let (glibc_version, libc_type) = if system == OsKind::Linux {
        detect_libc().await
    } else {
        (None, LibcType::Unknown)
    };

    LibraryInfo {
        openssl_version,
        glibc_version,
        libc_type,
    }
}

async fn detect_libc() -> (Option<String>, LibcType) {
    // musl's ldd prints its banner on stderr and exits nonzero.
    if let Some(out) = run_probe("ldd", &["--version"]).await {
        let combined = format!("{}{}", out.stdout, out.stderr);
        if combined.contains("musl") {
            return (None, LibcType::Musl);
        }
        if let Some(version) = parse_glibc_version(&combined) {
            return (Some(version), LibcType::Glibc);
        }
    }

    if Path::new("/lib/ld-musl-x86_64.so.1").exists()
        || Path::new("/lib/ld-musl-aarch64.so.1").exists()
    {
        return (None, LibcType::Musl);
    }

    (None, LibcType::Unknown)
}

/// Pull the glibc version out of `ldd --version` output.
///
/// First line looks like `ldd (Debian GLIBC 2.36-9+deb12u4) 2.36`.
fn parse_glibc_version(output: &str) -> Option<String> {
    let first = output.lines().next()?;
    if !first.to_ascii_lowercase().contains("glibc") && !first.contains("GNU libc") {
        return None;
    }
    first
        .split_whitespace()
        .last()
        .filter(|tok| tok.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_runtime_from_cgroup() {
        assert_eq!(
            container_runtime_from_cgroup("12:pids:/docker/abc123"),
            Some("docker")
        );
        assert_eq!(
            container_runtime_from_cgroup("11:memory:/kubepods/burstable/pod9f"),
            Some("kubernetes")
        );
        assert_eq!(
            container_runtime_from_cgroup("3:cpu:/system.slice/containerd.service/x"),
            Some("containerd")
        );
        assert_eq!(container_runtime_from_cgroup("0::/init.scope"), None);
    }

    #[test]
    fn test_parse_glibc_version() {
        assert_eq!(
            parse_glibc_version("ldd (Debian GLIBC 2.36-9+deb12u4) 2.36\nCopyright"),
            Some("2.36".to_string())
        );
        assert_eq!(
            parse_glibc_version("ldd (GNU libc) 2.39"),
            Some("2.39".to_string())
        );
        assert_eq!(parse_glibc_version("musl libc (x86_64)"), None);
        assert_eq!(parse_glibc_version(""), None);
    }

    #[tokio::test]
    async fn test_detect_never_fails() {
        let profile = detect().await;
        // Whatever the host looks like, the profile materializes.
        assert!(!profile.arch.is_empty());
    }

    #[tokio::test]
    async fn test_detect_is_idempotent() {
        let a = detect().await;
        let b = detect().await;
        assert_eq!(a.system, b.system);
        assert_eq!(a.distro, b.distro);
        assert_eq!(a.package_manager, b.package_manager);
    }
}
