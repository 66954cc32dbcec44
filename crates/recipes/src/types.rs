//! Recipe and failure-handler data model.
//!
//! A [`RecipeDef`] is the static description of how to install one tool:
//! its method specs per install strategy, dependencies, required system
//! packages per distro family, a verify command, and an ordered list of
//! failure handlers with remediation options. Definitions deserialize from
//! the on-disk catalog with a strict schema (unknown keys are rejected)
//! and are compiled into an immutable registry at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use opsdeck_profile::{DistroFamily, PackageManager};

/// Wildcard key in `commands_by_pm` / `needs_sudo_by_pm` maps: applies to
/// any package manager not listed explicitly.
pub const ANY_PM: &str = "_any";

/// A named install strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodFamily {
    Apt,
    Dnf,
    Apk,
    Pacman,
    Zypper,
    Brew,
    Snap,
    Pip,
    Pipx,
    Cargo,
    Npm,
    /// Piped installer script fetched over HTTPS.
    BashCurlScript,
    /// Direct binary download.
    BinaryDownload,
    /// Fallback spec used when no family matches the host.
    #[serde(rename = "_default")]
    Default,
}

impl MethodFamily {
    /// Stable string form, matching the wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Apk => "apk",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
            Self::Brew => "brew",
            Self::Snap => "snap",
            Self::Pip => "pip",
            Self::Pipx => "pipx",
            Self::Cargo => "cargo",
            Self::Npm => "npm",
            Self::BashCurlScript => "bash-curl-script",
            Self::BinaryDownload => "binary-download",
            Self::Default => "_default",
        }
    }

    /// The method family that fronts a native package manager, if any.
    #[must_use]
    pub fn for_package_manager(pm: PackageManager) -> Option<Self> {
        match pm {
            PackageManager::Apt => Some(Self::Apt),
            PackageManager::Dnf | PackageManager::Yum => Some(Self::Dnf),
            PackageManager::Apk => Some(Self::Apk),
            PackageManager::Pacman => Some(Self::Pacman),
            PackageManager::Zypper => Some(Self::Zypper),
            PackageManager::Brew => Some(Self::Brew),
            PackageManager::Choco | PackageManager::Winget | PackageManager::None => None,
        }
    }
}

impl fmt::Display for MethodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One method entry: a family plus the commands it runs.
///
/// Entries keep their declared order; the resolver picks the first one
/// viable for the host profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodEntry {
    /// Install strategy this entry implements.
    pub family: MethodFamily,
    /// Install argv per package manager; `_any` is the wildcard key.
    pub commands_by_pm: BTreeMap<String, Vec<String>>,
    /// Sudo requirement per package manager; `_any` is the wildcard key.
    #[serde(default)]
    pub needs_sudo_by_pm: BTreeMap<String, bool>,
    /// URL template for binary downloads; `{arch}` and `{system}` expand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_url_template: Option<String>,
    /// Architectures the template publishes artifacts for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binary_archs: Vec<String>,
    /// Environment exports to advise after install (PATH additions etc.).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub post_env: BTreeMap<String, String>,
}

impl MethodEntry {
    /// Install argv for the given package manager, falling back to `_any`.
    #[must_use]
    pub fn command_for(&self, pm: PackageManager) -> Option<&Vec<String>> {
        self.commands_by_pm
            .get(pm.as_str())
            .or_else(|| self.commands_by_pm.get(ANY_PM))
    }

    /// Sudo requirement for the given package manager.
    ///
    /// Falls back to `_any`, then to whether the manager itself needs
    /// elevation.
    #[must_use]
    pub fn needs_sudo_for(&self, pm: PackageManager) -> bool {
        self.needs_sudo_by_pm
            .get(pm.as_str())
            .or_else(|| self.needs_sudo_by_pm.get(ANY_PM))
            .copied()
            .unwrap_or_else(|| pm.requires_sudo())
    }
}

/// Declared risk of a remediation option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

/// What executing a remediation option actually does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationStrategy {
    /// Re-run the failed plan unchanged.
    RetrySameMethod,
    /// Re-run with extra arguments appended to the failed step.
    RetryWithArgs { extra_args: Vec<String> },
    /// Re-resolve the plan forcing a different method family.
    SwitchMethod { family: MethodFamily },
    /// Install another tool first, then re-run the original goal.
    InstallPrereq { tool: String },
    /// Install the option's declared system packages, then re-run.
    InstallSystemPackages,
    /// Re-run supplying the operator's sudo password.
    RetryWithSudoSecret,
    /// Hand the operator instructions; nothing is executed.
    Manual { instructions: String },
}

/// A declarative precondition gating an option's availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LockCondition {
    /// Option needs this tool on PATH.
    RequiresTool { tool: String },
    /// Option needs working sudo (or root).
    RequiresSudo,
    /// Option needs a specific package manager available.
    RequiresPackageManager { manager: PackageManager },
    /// Option needs systemd (snap installs, service management).
    RequiresSystemd,
    /// Catalog knows this option cannot be unlocked on this family.
    DeclaredLocked { reason: String },
}

/// One remediation option offered to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemediationOptionDef {
    /// Stable option id, unique within its handler.
    pub id: String,
    /// Short UI label.
    pub label: String,
    /// UI icon name.
    pub icon: String,
    /// One-sentence explanation of what the option does.
    pub description: String,
    /// What choosing the option executes.
    pub strategy: RemediationStrategy,
    /// Declared risk; never recomputed.
    pub risk: Risk,
    /// Marks the option the UI should preselect.
    #[serde(default)]
    pub recommended: bool,
    /// Step-count fallback when hypothetical resolution is impossible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count_est: Option<u32>,
    /// Rough wall-clock estimate for the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    /// Availability preconditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lock_conditions: Vec<LockCondition>,
    /// System packages the option installs, per distro family.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_system_packages_by_family: BTreeMap<DistroFamily, Vec<String>>,
}

/// Classifier for one failure class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureHandlerDef {
    /// Stable failure id; `(tool_id, failure_id)` is the handler identity.
    pub failure_id: String,
    /// Grouping for the UI, e.g. `python-packaging` or `toolchain`.
    pub category: String,
    /// Short UI label.
    pub label: String,
    /// Operator-facing explanation of the failure class.
    pub description: String,
    /// Exact exit-code match; `None` matches any exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Regex searched against the stderr tail.
    pub pattern: String,
    /// Restrict the handler to steps installed via this family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_family: Option<MethodFamily>,
    /// Remediation options, in display order.
    pub options: Vec<RemediationOptionDef>,
    /// Stitch the next failure on a chosen option into an escalation chain.
    #[serde(default)]
    pub chain_forward: bool,
    /// This failure blocks blind retries until the operator intervenes.
    #[serde(default)]
    pub precludes_retry: bool,
}

/// Static description of how to install one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeDef {
    /// Tool id, unique across the catalog.
    pub id: String,
    /// Human label.
    pub label: String,
    /// Catalog grouping, e.g. `linting` or `infrastructure`.
    pub category: String,
    /// Method entries in preference order. Never empty.
    pub methods: Vec<MethodEntry>,
    /// Tool ids that must be on PATH before this tool installs.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Native packages required per distro family.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub system_packages_by_family: BTreeMap<DistroFamily, Vec<String>>,
    /// Command that exits 0 iff the tool is installed.
    pub verify: Vec<String>,
    /// Per-step timeout override in seconds; the executor default applies
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
    /// Failure handlers in match order.
    #[serde(default)]
    pub on_failure: Vec<FailureHandlerDef>,
    /// Example stderr per failure id; validated against patterns at load.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub example_stderr_by_failure_id: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(commands: &[(&str, &[&str])]) -> MethodEntry {
        MethodEntry {
            family: MethodFamily::Pip,
            commands_by_pm: commands
                .iter()
                .map(|(pm, argv)| {
                    (
                        (*pm).to_string(),
                        argv.iter().map(|s| (*s).to_string()).collect(),
                    )
                })
                .collect(),
            needs_sudo_by_pm: BTreeMap::new(),
            binary_url_template: None,
            binary_archs: Vec::new(),
            post_env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_command_lookup_prefers_exact_pm() {
        let entry = entry_with(&[
            ("_any", &["pip", "install", "x"]),
            ("apt", &["apt-get", "install", "-y", "x"]),
        ]);
        assert_eq!(
            entry.command_for(PackageManager::Apt).unwrap()[0],
            "apt-get"
        );
        assert_eq!(entry.command_for(PackageManager::Brew).unwrap()[0], "pip");
    }

    #[test]
    fn test_command_lookup_misses_without_wildcard() {
        let entry = entry_with(&[("apt", &["apt-get", "install", "-y", "x"])]);
        assert!(entry.command_for(PackageManager::Brew).is_none());
    }

    #[test]
    fn test_needs_sudo_falls_back_to_pm_default() {
        let entry = entry_with(&[("_any", &["pip", "install", "x"])]);
        assert!(entry.needs_sudo_for(PackageManager::Apt));
        assert!(!entry.needs_sudo_for(PackageManager::Brew));
    }

    #[test]
    fn test_needs_sudo_explicit_override() {
        let mut entry = entry_with(&[("_any", &["pip", "install", "--user", "x"])]);
        entry.needs_sudo_by_pm.insert("_any".to_string(), false);
        assert!(!entry.needs_sudo_for(PackageManager::Apt));
    }

    #[test]
    fn test_method_family_wire_names() {
        assert_eq!(
            serde_json::to_value(MethodFamily::BashCurlScript).unwrap(),
            "bash-curl-script"
        );
        assert_eq!(serde_json::to_value(MethodFamily::Default).unwrap(), "_default");
        let parsed: MethodFamily = serde_json::from_str("\"binary-download\"").unwrap();
        assert_eq!(parsed, MethodFamily::BinaryDownload);
    }

    #[test]
    fn test_strategy_tagging() {
        let strategy = RemediationStrategy::InstallPrereq {
            tool: "pipx".to_string(),
        };
        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["kind"], "install_prereq");
        assert_eq!(json["tool"], "pipx");
    }

    #[test]
    fn test_recipe_def_rejects_unknown_keys() {
        let raw = r#"{
            "id": "x", "label": "X", "category": "misc",
            "methods": [], "verify": ["x", "--version"],
            "surprise": true
        }"#;
        let err = serde_json::from_str::<RecipeDef>(raw).unwrap_err();
        assert!(err.to_string().contains("surprise"));
    }
}
