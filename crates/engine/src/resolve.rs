//! Plan resolution.
//!
//! Walks the recipe graph against a host profile and emits an ordered,
//! deduplicated [`InstallPlan`]. Resolution is deterministic: the same
//! tool, profile and host package state always produce byte-identical
//! steps.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use opsdeck_profile::{DistroFamily, PackageManager, SystemProfile};
use opsdeck_recipes::{MethodEntry, MethodFamily, Recipe, RecipeRegistry};

use crate::error::EngineError;
use crate::plan::{
    ExpectedExit, InstallPlan, InstallStep, StepKind, StepProduct, DEFAULT_STEP_TIMEOUT,
};
use crate::probe::{missing_packages, HostProbe};

/// Adjustments a remediation option applies to a fresh resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOverrides {
    /// Force this method family for the target tool.
    pub force_family: Option<MethodFamily>,
    /// Extra arguments appended to the target install command.
    pub extra_args: Vec<String>,
    /// Additional system packages to install first.
    pub extra_system_packages_by_family: BTreeMap<DistroFamily, Vec<String>>,
    /// Skip the pre-flight verify so an install is planned even when the
    /// tool already answers (toolchain updates).
    pub force_reinstall: bool,
}

/// Resolves install plans against the immutable registry.
pub struct Resolver {
    registry: Arc<RecipeRegistry>,
    probe: Arc<dyn HostProbe>,
}

impl Resolver {
    /// Create a resolver over the given registry and host probe.
    #[must_use]
    pub fn new(registry: Arc<RecipeRegistry>, probe: Arc<dyn HostProbe>) -> Self {
        Self { registry, probe }
    }

    /// The registry this resolver plans against.
    #[must_use]
    pub fn registry(&self) -> &Arc<RecipeRegistry> {
        &self.registry
    }

    /// Resolve an install plan for a tool.
    pub async fn resolve(
        &self,
        tool_id: &str,
        profile: &SystemProfile,
    ) -> Result<InstallPlan, EngineError> {
        self.resolve_with(tool_id, profile, &ResolveOverrides::default())
            .await
    }

    /// Resolve with remediation overrides applied.
    pub async fn resolve_with(
        &self,
        tool_id: &str,
        profile: &SystemProfile,
        overrides: &ResolveOverrides,
    ) -> Result<InstallPlan, EngineError> {
        let recipe = self
            .registry
            .lookup(tool_id)
            .ok_or_else(|| EngineError::UnknownTool {
                tool: tool_id.to_string(),
            })?;

        let snapshot_id = profile_snapshot_id(profile);

        if !overrides.force_reinstall && self.probe.verify(&recipe.spec.verify).await {
            debug!("'{tool_id}' already verifies, empty plan");
            return Ok(InstallPlan::already_installed(tool_id, &snapshot_id));
        }

        // Transitive deps in install order, minus the ones already present.
        let dep_order = self.dep_order(tool_id)?;
        let mut pending_deps = Vec::new();
        for dep_id in dep_order {
            let dep = self
                .registry
                .lookup(&dep_id)
                .ok_or_else(|| EngineError::UnknownTool { tool: dep_id.clone() })?;
            if self.probe.verify(&dep.spec.verify).await || self.probe.which(&dep_id) {
                continue;
            }
            pending_deps.push((dep_id, dep));
        }

        // Pick a method for every tool that still needs installing.
        // Earlier plan steps satisfy later ones: a dep's install makes the
        // binary behind its verify command available, so later method
        // selection may assume it.
        let mut assume_present: BTreeSet<String> = BTreeSet::new();
        let mut dep_methods = Vec::with_capacity(pending_deps.len());
        for (dep_id, dep) in &pending_deps {
            let method = self
                .select_method(dep, profile, None, &assume_present)
                .map_err(|_| EngineError::NoViableMethod {
                    tool: tool_id.to_string(),
                    reason: format!("dependency '{dep_id}' has no viable install method"),
                })?;
            dep_methods.push(method);
            assume_present.insert(dep_id.clone());
            if let Some(program) = dep.spec.verify.first() {
                assume_present.insert(program.clone());
            }
        }
        let target_method =
            self.select_method(recipe, profile, overrides.force_family, &assume_present)?;

        // System packages for every selected method, deduped in order.
        let family = profile.distro.family;
        let mut packages: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        let package_sources = pending_deps
            .iter()
            .map(|(_, dep)| &dep.spec.system_packages_by_family)
            .chain(std::iter::once(&recipe.spec.system_packages_by_family))
            .chain(std::iter::once(&overrides.extra_system_packages_by_family));
        for source in package_sources {
            for pkg in source.get(&family).into_iter().flatten() {
                if seen.insert(pkg.clone()) {
                    packages.push(pkg.clone());
                }
            }
        }

        let pm = profile.package_manager.primary;
        let packages = if pm == PackageManager::None {
            packages
        } else {
            missing_packages(self.probe.as_ref(), pm, &packages).await
        };

        let timeout_secs = recipe
            .spec
            .step_timeout_secs
            .unwrap_or(DEFAULT_STEP_TIMEOUT.as_secs());
        let is_root = profile.capabilities.is_root;
        let mut steps = Vec::new();

        if !packages.is_empty() && pm != PackageManager::None {
            let mut command = pm_install_argv(pm);
            command.extend(packages.iter().cloned());
            steps.push(InstallStep {
                kind: StepKind::SystemPkgs,
                label: format!("Install system packages ({})", packages.join(", ")),
                command,
                needs_sudo: pm.requires_sudo() && !is_root,
                timeout_secs,
                expected_exit: ExpectedExit::Zero,
                produces: StepProduct::Packages {
                    names: packages.clone(),
                },
                method_family: None,
            });
        }

        for ((dep_id, dep), method) in pending_deps.iter().zip(&dep_methods) {
            let command = method
                .command_for(pm)
                .ok_or_else(|| EngineError::NoViableMethod {
                    tool: dep_id.clone(),
                    reason: format!("method '{}' has no command for {pm}", method.family),
                })?
                .clone();
            steps.push(InstallStep {
                kind: StepKind::InstallDep,
                label: format!("Install {}", dep.spec.label),
                command,
                needs_sudo: method.needs_sudo_for(pm) && !is_root,
                timeout_secs,
                expected_exit: ExpectedExit::Zero,
                produces: StepProduct::Tool { id: dep_id.clone() },
                method_family: Some(method.family),
            });
        }

        let mut command = target_method
            .command_for(pm)
            .ok_or_else(|| EngineError::NoViableMethod {
                tool: tool_id.to_string(),
                reason: format!(
                    "method '{}' has no command for {pm}",
                    target_method.family
                ),
            })?
            .clone();
        command.extend(overrides.extra_args.iter().cloned());
        steps.push(InstallStep {
            kind: StepKind::InstallTarget,
            label: format!("Install {}", recipe.spec.label),
            command,
            needs_sudo: target_method.needs_sudo_for(pm) && !is_root,
            timeout_secs,
            expected_exit: ExpectedExit::Zero,
            produces: StepProduct::Tool {
                id: tool_id.to_string(),
            },
            method_family: Some(target_method.family),
        });

        let post_env: BTreeMap<String, String> = dep_methods
            .iter()
            .chain(std::iter::once(&target_method))
            .flat_map(|m| m.post_env.clone())
            .collect();
        if !post_env.is_empty() {
            let exports = post_env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            steps.push(InstallStep {
                kind: StepKind::PostEnv,
                label: format!("Environment exports: {exports}"),
                command: Vec::new(),
                needs_sudo: false,
                timeout_secs,
                expected_exit: ExpectedExit::Any,
                produces: StepProduct::Nothing,
                method_family: None,
            });
        }

        steps.push(InstallStep {
            kind: StepKind::Verify,
            label: format!("Verify {}", recipe.spec.label),
            command: recipe.spec.verify.clone(),
            needs_sudo: false,
            timeout_secs,
            expected_exit: ExpectedExit::Zero,
            produces: StepProduct::Nothing,
            method_family: None,
        });

        let needs_sudo_overall = steps.iter().any(|s| s.needs_sudo);
        let advisory_ephemeral = profile.container.in_container && profile.container.ephemeral;

        Ok(InstallPlan {
            tool_id: tool_id.to_string(),
            profile_snapshot_id: snapshot_id,
            steps,
            already_installed: false,
            needs_sudo_overall,
            advisory_ephemeral,
        })
    }

    /// Transitive dependencies of a tool in install order (dependencies
    /// first), excluding the tool itself. Cycles are fatal.
    fn dep_order(&self, tool_id: &str) -> Result<Vec<String>, EngineError> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();
        self.visit_deps(tool_id, &mut order, &mut visited, &mut stack)?;
        order.retain(|id| id != tool_id);
        Ok(order)
    }

    fn visit_deps(
        &self,
        tool_id: &str,
        order: &mut Vec<String>,
        visited: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        if stack.iter().any(|s| s == tool_id) {
            let mut path = stack.clone();
            path.push(tool_id.to_string());
            return Err(EngineError::DepCycle {
                tool: tool_id.to_string(),
                path: path.join(" -> "),
            });
        }
        if !visited.insert(tool_id.to_string()) {
            return Ok(());
        }

        let recipe = self
            .registry
            .lookup(tool_id)
            .ok_or_else(|| EngineError::UnknownTool {
                tool: tool_id.to_string(),
            })?;

        stack.push(tool_id.to_string());
        for dep in &recipe.spec.deps {
            self.visit_deps(dep, order, visited, stack)?;
        }
        stack.pop();

        order.push(tool_id.to_string());
        Ok(())
    }

    /// Pick the method entry to install a recipe with on this host.
    ///
    /// Entries are considered in declared order; the first viable one
    /// wins. An unknown distro family restricts selection to `_default`
    /// and binary downloads.
    fn select_method<'r>(
        &self,
        recipe: &'r Recipe,
        profile: &SystemProfile,
        force_family: Option<MethodFamily>,
        assume_present: &BTreeSet<String>,
    ) -> Result<&'r MethodEntry, EngineError> {
        let candidates: Vec<&MethodEntry> = match force_family {
            Some(family) => recipe
                .spec
                .methods
                .iter()
                .filter(|m| m.family == family)
                .collect(),
            None => recipe.spec.methods.iter().collect(),
        };

        for entry in candidates {
            if self.method_viable(entry, profile, assume_present) {
                return Ok(entry);
            }
        }

        Err(EngineError::NoViableMethod {
            tool: recipe.spec.id.clone(),
            reason: match force_family {
                Some(family) => format!("method family '{family}' is not viable on this system"),
                None => format!(
                    "none of [{}] is viable on this system",
                    recipe
                        .spec
                        .methods
                        .iter()
                        .map(|m| m.family.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
        })
    }

    fn method_viable(
        &self,
        entry: &MethodEntry,
        profile: &SystemProfile,
        assume_present: &BTreeSet<String>,
    ) -> bool {
        let pm = profile.package_manager.primary;
        let have = |binary: &str| {
            assume_present.contains(binary) || self.probe.which(binary)
        };

        // Unknown distro lineage: nothing package-manager or frontend
        // driven can be trusted, only explicit fallbacks.
        if profile.distro.family == DistroFamily::Unknown
            && !matches!(
                entry.family,
                MethodFamily::Default | MethodFamily::BinaryDownload
            )
        {
            return false;
        }

        match entry.family {
            MethodFamily::Apt
            | MethodFamily::Dnf
            | MethodFamily::Apk
            | MethodFamily::Pacman
            | MethodFamily::Zypper
            | MethodFamily::Brew => {
                MethodFamily::for_package_manager(pm) == Some(entry.family)
                    && entry.command_for(pm).is_some()
            }
            MethodFamily::Snap => profile.package_manager.snap_available,
            MethodFamily::Pip => have("pip") || have("pip3"),
            MethodFamily::Pipx => have("pipx"),
            MethodFamily::Cargo => have("cargo"),
            MethodFamily::Npm => have("npm"),
            MethodFamily::BashCurlScript => have("curl") || have("wget"),
            MethodFamily::BinaryDownload => {
                entry.binary_url_template.is_some()
                    && entry.binary_archs.iter().any(|a| *a == profile.arch)
            }
            MethodFamily::Default => true,
        }
    }
}

/// Install argv prefix for a package manager.
fn pm_install_argv(pm: PackageManager) -> Vec<String> {
    let parts: &[&str] = match pm {
        PackageManager::Apt => &["apt-get", "install", "-y"],
        PackageManager::Dnf => &["dnf", "install", "-y"],
        PackageManager::Yum => &["yum", "install", "-y"],
        PackageManager::Apk => &["apk", "add"],
        PackageManager::Pacman => &["pacman", "-S", "--noconfirm"],
        PackageManager::Zypper => &["zypper", "install", "-y"],
        PackageManager::Brew => &["brew", "install"],
        PackageManager::Choco => &["choco", "install", "-y"],
        PackageManager::Winget => &["winget", "install"],
        PackageManager::None => &[],
    };
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Deterministic fingerprint of a profile snapshot.
fn profile_snapshot_id(profile: &SystemProfile) -> String {
    let mut hasher = DefaultHasher::new();
    // Hash the serialized form; the profile itself does not implement Hash.
    serde_json::to_string(profile)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!(
        "{}-{}-{:016x}",
        profile.distro.id,
        profile.package_manager.primary,
        hasher.finish()
    )
}
