//! The system profile data model.
//!
//! A [`SystemProfile`] is an immutable snapshot of the host: operating
//! system, distro lineage, container status, privilege capabilities,
//! package managers and core library versions. Every field that cannot be
//! detected degrades to `None` or an `Unknown` variant; building a profile
//! never fails.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Operating system kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsKind {
    Linux,
    Darwin,
    Windows,
    Unknown,
}

impl OsKind {
    /// Detect from the compile-time target OS.
    #[must_use]
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::Darwin,
            "windows" => Self::Windows,
            _ => Self::Unknown,
        }
    }
}

/// Distro family grouping used to key system-package lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroFamily {
    Debian,
    Rhel,
    Alpine,
    Arch,
    Suse,
    Macos,
    Windows,
    Unknown,
}

impl DistroFamily {
    /// Stable string form, matching the wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Rhel => "rhel",
            Self::Alpine => "alpine",
            Self::Arch => "arch",
            Self::Suse => "suse",
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distro identification parsed from `/etc/os-release` (or fixed on
/// macOS/Windows).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistroInfo {
    /// Raw `ID` field, e.g. `debian`, `ubuntu`, `fedora`.
    pub id: String,
    /// Family grouping the recipes key on.
    pub family: DistroFamily,
    /// Raw `VERSION_ID` field, e.g. `"12"` or `"22.04"`.
    pub version: Option<String>,
    /// Numeric components of `version`, for ordered comparisons.
    pub version_tuple: Vec<u32>,
}

impl DistroInfo {
    /// A fully-unknown distro record.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            id: "unknown".to_string(),
            family: DistroFamily::Unknown,
            version: None,
            version_tuple: Vec::new(),
        }
    }
}

/// Container runtime status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Running inside any container.
    pub in_container: bool,
    /// Detected runtime, e.g. `docker` or `containerd`.
    pub runtime: Option<String>,
    /// Running inside a Kubernetes pod.
    pub in_k8s: bool,
    /// Filesystem is expected to be discarded (no persistent install).
    pub ephemeral: bool,
}

/// Privilege and init-system capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// systemd is present and the system bus answers.
    pub has_systemd: bool,
    /// `sudo` binary is on PATH.
    pub has_sudo: bool,
    /// `sudo -n true` succeeds without a password.
    pub passwordless_sudo: bool,
    /// Effective UID is 0.
    pub is_root: bool,
}

/// Known package managers, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Apk,
    Pacman,
    Zypper,
    Brew,
    Choco,
    Winget,
    None,
}

impl PackageManager {
    /// The binary probed on PATH for this manager.
    #[must_use]
    pub fn probe_binary(self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Apk => "apk",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
            Self::Brew => "brew",
            Self::Choco => "choco",
            Self::Winget => "winget",
            Self::None => "",
        }
    }

    /// Stable string form, matching the wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Apk => "apk",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
            Self::Brew => "brew",
            Self::Choco => "choco",
            Self::Winget => "winget",
            Self::None => "none",
        }
    }

    /// Fixed probe order; the first binary found on PATH becomes primary.
    #[must_use]
    pub fn probe_order() -> &'static [Self] {
        &[
            Self::Apt,
            Self::Dnf,
            Self::Yum,
            Self::Apk,
            Self::Pacman,
            Self::Zypper,
            Self::Brew,
            Self::Choco,
            Self::Winget,
        ]
    }

    /// Whether installs through this manager require elevated privileges.
    #[must_use]
    pub fn requires_sudo(self) -> bool {
        matches!(
            self,
            Self::Apt | Self::Dnf | Self::Yum | Self::Apk | Self::Pacman | Self::Zypper
        )
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package manager availability on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManagerInfo {
    /// First manager found in probe order.
    pub primary: PackageManager,
    /// All managers found on PATH.
    pub available: BTreeSet<PackageManager>,
    /// `snap` on PATH and systemd answering (snapd needs it).
    pub snap_available: bool,
}

impl Default for PackageManagerInfo {
    fn default() -> Self {
        Self {
            primary: PackageManager::None,
            available: BTreeSet::new(),
            snap_available: false,
        }
    }
}

/// C library flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibcType {
    Glibc,
    Musl,
    #[default]
    Unknown,
}

/// Core library versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    /// First token of `openssl version`, e.g. `3.0.11`.
    pub openssl_version: Option<String>,
    /// glibc version from the loader, e.g. `2.36`.
    pub glibc_version: Option<String>,
    /// Detected libc flavor.
    pub libc_type: LibcType,
}

/// Immutable snapshot of the host system.
///
/// Consumers hold read-only references for the lifetime of a request; the
/// [`ProfileService`](crate::service::ProfileService) refreshes at most
/// once per five seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProfile {
    /// Operating system kind.
    pub system: OsKind,
    /// Kernel release string, e.g. `6.1.0-18-amd64`.
    pub kernel: Option<String>,
    /// Raw machine string, e.g. `x86_64`.
    pub machine: Option<String>,
    /// Normalized architecture: `amd64`, `arm64`, or lowercased raw.
    pub arch: String,
    /// Distro identification.
    pub distro: DistroInfo,
    /// Container status.
    pub container: ContainerInfo,
    /// Privilege capabilities.
    pub capabilities: Capabilities,
    /// Package manager availability.
    pub package_manager: PackageManagerInfo,
    /// Library versions.
    pub libraries: LibraryInfo,
}

impl SystemProfile {
    /// A profile with every field unknown. Used as the fallback when the
    /// host cannot be probed at all, and as a base in tests.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            system: OsKind::Unknown,
            kernel: None,
            machine: None,
            arch: "unknown".to_string(),
            distro: DistroInfo::unknown(),
            container: ContainerInfo::default(),
            capabilities: Capabilities::default(),
            package_manager: PackageManagerInfo::default(),
            libraries: LibraryInfo::default(),
        }
    }
}

/// Normalize a raw machine string into the architecture names recipes use.
///
/// `x86_64`/`amd64` fold to `amd64`, `aarch64`/`arm64` fold to `arm64`,
/// anything else passes through lowercased.
#[must_use]
pub fn normalize_arch(machine: &str) -> String {
    match machine.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_arch() {
        assert_eq!(normalize_arch("x86_64"), "amd64");
        assert_eq!(normalize_arch("AMD64"), "amd64");
        assert_eq!(normalize_arch("aarch64"), "arm64");
        assert_eq!(normalize_arch("arm64"), "arm64");
        assert_eq!(normalize_arch("riscv64"), "riscv64");
        assert_eq!(normalize_arch("I686"), "i686");
    }

    #[test]
    fn test_package_manager_probe_order() {
        let order = PackageManager::probe_order();
        assert_eq!(order.first(), Some(&PackageManager::Apt));
        assert_eq!(order.last(), Some(&PackageManager::Winget));
        assert!(!order.contains(&PackageManager::None));
    }

    #[test]
    fn test_package_manager_sudo_requirements() {
        assert!(PackageManager::Apt.requires_sudo());
        assert!(PackageManager::Pacman.requires_sudo());
        assert!(!PackageManager::Brew.requires_sudo());
        assert!(!PackageManager::Winget.requires_sudo());
    }

    #[test]
    fn test_profile_serde_roundtrip() {
        let profile = SystemProfile::unknown();
        let json = serde_json::to_string(&profile).unwrap();
        let back: SystemProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(profile, back);
    }

    #[test]
    fn test_wire_format_names() {
        let json = serde_json::to_value(DistroFamily::Debian).unwrap();
        assert_eq!(json, "debian");
        let json = serde_json::to_value(PackageManager::Apt).unwrap();
        assert_eq!(json, "apt");
        let json = serde_json::to_value(LibcType::Musl).unwrap();
        assert_eq!(json, "musl");
    }
}
