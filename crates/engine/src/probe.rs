//! Host state probes used during plan resolution.
//!
//! Resolution needs to know three things about the host: whether a verify
//! command succeeds, whether a binary is on PATH, and whether a native
//! package is installed. The trait keeps resolution deterministic and
//! testable; the live implementation shells out with bounded probes.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use tracing::debug;

use opsdeck_profile::probe::run_probe;
use opsdeck_profile::PackageManager;

/// Maximum concurrent package-state probes.
const PACKAGE_PROBE_CONCURRENCY: usize = 8;

/// Read-only host state queries.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Run a verify command; true iff it exits 0.
    async fn verify(&self, command: &[String]) -> bool;

    /// True iff the binary resolves on PATH.
    fn which(&self, binary: &str) -> bool;

    /// True iff the native package is installed under this manager.
    async fn package_installed(&self, pm: PackageManager, package: &str) -> bool;
}

/// Filter a package list down to the ones not yet installed, probing with
/// bounded concurrency. Order of the input is preserved.
pub async fn missing_packages(
    probe: &dyn HostProbe,
    pm: PackageManager,
    packages: &[String],
) -> Vec<String> {
    let mut missing = BTreeSet::new();
    let mut pending = FuturesUnordered::new();
    let mut queue = packages.iter();

    loop {
        while pending.len() < PACKAGE_PROBE_CONCURRENCY {
            match queue.next() {
                Some(pkg) => pending.push(async move {
                    let installed = probe.package_installed(pm, pkg).await;
                    (pkg.clone(), installed)
                }),
                None => break,
            }
        }
        match pending.next().await {
            Some((pkg, installed)) => {
                if !installed {
                    missing.insert(pkg);
                }
            }
            None => break,
        }
    }

    // Restore input order.
    packages
        .iter()
        .filter(|p| missing.contains(*p))
        .cloned()
        .collect()
}

/// Live host probe backed by subprocesses.
#[derive(Debug, Default)]
pub struct SystemProbe;

#[async_trait]
impl HostProbe for SystemProbe {
    async fn verify(&self, command: &[String]) -> bool {
        let Some((program, args)) = command.split_first() else {
            return false;
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_probe(program, &args).await.is_some_and(|o| o.ok())
    }

    fn which(&self, binary: &str) -> bool {
        which::which(binary).is_ok()
    }

    async fn package_installed(&self, pm: PackageManager, package: &str) -> bool {
        let query: Option<(&str, Vec<&str>)> = match pm {
            PackageManager::Apt => Some(("dpkg-query", vec!["-W", "-f=${Status}", package])),
            PackageManager::Dnf | PackageManager::Yum => Some(("rpm", vec!["-q", package])),
            PackageManager::Apk => Some(("apk", vec!["info", "-e", package])),
            PackageManager::Pacman => Some(("pacman", vec!["-Qi", package])),
            PackageManager::Zypper => Some(("rpm", vec!["-q", package])),
            PackageManager::Brew => Some(("brew", vec!["list", "--versions", package])),
            PackageManager::Choco | PackageManager::Winget | PackageManager::None => None,
        };
        let Some((program, args)) = query else {
            return false;
        };

        let Some(out) = run_probe(program, &args).await else {
            debug!("package probe for {package} via {program} failed, assuming missing");
            return false;
        };
        if !out.ok() {
            return false;
        }
        // dpkg reports status even for removed-but-known packages.
        if pm == PackageManager::Apt {
            return out.stdout.contains("install ok installed");
        }
        true
    }
}

pub mod testing {
    //! Scripted probe for tests in this crate and its consumers.

    use super::HostProbe;
    use async_trait::async_trait;
    use opsdeck_profile::PackageManager;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Probe answering from fixed sets, recording every query.
    #[derive(Debug, Default)]
    pub struct FakeProbe {
        /// Binaries "on PATH".
        pub binaries: BTreeSet<String>,
        /// Verify commands (joined argv) that succeed.
        pub passing_verifies: BTreeSet<String>,
        /// Installed native packages.
        pub installed_packages: BTreeSet<String>,
        /// Recorded package queries.
        pub package_queries: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        pub fn with_binaries(binaries: &[&str]) -> Self {
            Self {
                binaries: binaries.iter().map(|s| (*s).to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn pass_verify(mut self, command: &str) -> Self {
            self.passing_verifies.insert(command.to_string());
            self
        }

        pub fn with_packages(mut self, packages: &[&str]) -> Self {
            self.installed_packages = packages.iter().map(|s| (*s).to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl HostProbe for FakeProbe {
        async fn verify(&self, command: &[String]) -> bool {
            self.passing_verifies.contains(&command.join(" "))
        }

        fn which(&self, binary: &str) -> bool {
            self.binaries.contains(binary)
        }

        async fn package_installed(&self, _pm: PackageManager, package: &str) -> bool {
            self.package_queries
                .lock()
                .unwrap()
                .push(package.to_string());
            self.installed_packages.contains(package)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeProbe;
    use super::*;

    #[tokio::test]
    async fn test_missing_packages_preserves_order() {
        let probe = FakeProbe::default().with_packages(&["b"]);
        let packages = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let missing = missing_packages(&probe, PackageManager::Apt, &packages).await;
        assert_eq!(missing, vec!["c".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_packages_empty_input() {
        let probe = FakeProbe::default();
        let missing = missing_packages(&probe, PackageManager::Apt, &[]).await;
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_system_probe_verify() {
        let probe = SystemProbe;
        assert!(probe.verify(&["true".to_string()]).await);
        assert!(!probe.verify(&["false".to_string()]).await);
        assert!(!probe.verify(&[]).await);
    }
}
