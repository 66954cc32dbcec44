//! Remediation planning.
//!
//! Turns a matched failure handler into the operator-facing response:
//! options annotated with live availability against the host profile,
//! hypothetical step counts, the escalation chain, and the fallback
//! actions that always remain.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use opsdeck_profile::{PackageManager, SystemProfile};
use opsdeck_recipes::{
    LockCondition, RemediationOptionDef, RemediationStrategy, Risk,
};

use crate::chain::ChainSummary;
use crate::matcher::{MatchedFailure, MatchedLayer};
use crate::probe::HostProbe;
use crate::resolve::{ResolveOverrides, Resolver};

/// Whether an option can execute right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// Can execute now.
    Ready,
    /// Needs a prerequisite first.
    Locked,
    /// The host lacks the capability; no prerequisite will help.
    Impossible,
}

/// The matched failure as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub failure_id: String,
    pub category: String,
    pub label: String,
    pub description: String,
    pub matched_layer: MatchedLayer,
}

/// One option annotated with availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationOptionView {
    pub id: String,
    pub label: String,
    pub description: String,
    pub icon: String,
    pub strategy: RemediationStrategy,
    pub risk: Risk,
    pub availability: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_reason: Option<String>,
    pub step_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub recommended: bool,
}

/// Always-available fallback actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackAction {
    Cancel,
    Retry,
    Manual,
}

/// Fallback action set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    pub actions: Vec<FallbackAction>,
}

/// The full remediation payload attached to a terminal `done` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationResponse {
    pub failure: FailureInfo,
    pub options: Vec<RemediationOptionView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainSummary>,
    pub fallback: Fallback,
}

/// Builds remediation responses. Pure given a handler and a profile
/// snapshot: no subprocess runs, no blocking.
#[derive(Clone)]
pub struct RemediationPlanner {
    resolver: Arc<Resolver>,
    probe: Arc<dyn HostProbe>,
}

impl RemediationPlanner {
    /// Create a planner sharing the resolver's registry and probe.
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, probe: Arc<dyn HostProbe>) -> Self {
        Self { resolver, probe }
    }

    /// Build the response for a matched failure.
    pub async fn build(
        &self,
        matched: &MatchedFailure,
        tool_id: &str,
        profile: &SystemProfile,
        chain: Option<ChainSummary>,
    ) -> RemediationResponse {
        let loop_detected = chain.as_ref().is_some_and(|c| c.loop_detected);

        let mut options = Vec::with_capacity(matched.handler.options.len());
        let mut recommended_seen = false;
        for option in &matched.handler.options {
            let mut view = self.build_option(option, tool_id, profile).await;

            // A detected loop degrades everything except manual escape
            // hatches.
            if loop_detected
                && !matches!(option.strategy, RemediationStrategy::Manual { .. })
            {
                view.availability = Availability::Impossible;
                view.lock_reason =
                    Some("previous attempts looped back to this failure".to_string());
            }

            // Exactly one recommended option; first declared wins.
            if view.recommended {
                if recommended_seen {
                    view.recommended = false;
                } else {
                    recommended_seen = true;
                }
            }
            options.push(view);
        }

        let mut actions = vec![FallbackAction::Cancel];
        if !matched.handler.precludes_retry && !loop_detected {
            actions.push(FallbackAction::Retry);
        }
        actions.push(FallbackAction::Manual);

        RemediationResponse {
            failure: FailureInfo {
                failure_id: matched.handler.failure_id.clone(),
                category: matched.handler.category.clone(),
                label: matched.handler.label.clone(),
                description: matched.handler.description.clone(),
                matched_layer: matched.layer,
            },
            options,
            chain,
            fallback: Fallback { actions },
        }
    }

    async fn build_option(
        &self,
        option: &RemediationOptionDef,
        tool_id: &str,
        profile: &SystemProfile,
    ) -> RemediationOptionView {
        let (availability, lock_reason) = self.availability(option, profile);

        let step_count = if availability == Availability::Impossible {
            option.step_count_est.unwrap_or(0)
        } else {
            self.hypothetical_step_count(option, tool_id, profile).await
        };

        RemediationOptionView {
            id: option.id.clone(),
            label: option.label.clone(),
            description: option.description.clone(),
            icon: option.icon.clone(),
            strategy: option.strategy.clone(),
            risk: option.risk,
            availability,
            lock_reason,
            step_count,
            estimated_time: option.estimated_time.clone(),
            recommended: option.recommended,
        }
    }

    /// Compute availability from lock conditions and the strategy's own
    /// implicit requirements.
    fn availability(
        &self,
        option: &RemediationOptionDef,
        profile: &SystemProfile,
    ) -> (Availability, Option<String>) {
        let caps = &profile.capabilities;
        let can_sudo = caps.is_root || caps.has_sudo;

        for condition in &option.lock_conditions {
            match condition {
                LockCondition::RequiresSudo => {
                    if !can_sudo {
                        return (
                            Availability::Impossible,
                            Some("sudo is not available on this system".to_string()),
                        );
                    }
                }
                LockCondition::RequiresTool { tool } => {
                    if !self.probe.which(tool) {
                        if self.resolver.registry().lookup(tool).is_some() {
                            return (
                                Availability::Locked,
                                Some(format!("{tool} is not installed")),
                            );
                        }
                        return (
                            Availability::Impossible,
                            Some(format!("{tool} is not installed and cannot be provisioned")),
                        );
                    }
                }
                LockCondition::RequiresPackageManager { manager } => {
                    if !profile.package_manager.available.contains(manager) {
                        return (
                            Availability::Impossible,
                            Some(format!("{manager} is not available on this system")),
                        );
                    }
                }
                LockCondition::RequiresSystemd => {
                    if !caps.has_systemd {
                        return (
                            Availability::Impossible,
                            Some("systemd is not running on this system".to_string()),
                        );
                    }
                }
                LockCondition::DeclaredLocked { reason } => {
                    return (Availability::Locked, Some(reason.clone()));
                }
            }
        }

        match &option.strategy {
            RemediationStrategy::RetryWithSudoSecret => {
                if !can_sudo {
                    return (
                        Availability::Impossible,
                        Some("sudo is not available on this system".to_string()),
                    );
                }
            }
            RemediationStrategy::InstallPrereq { tool } => {
                if self.resolver.registry().lookup(tool).is_none() {
                    return (
                        Availability::Impossible,
                        Some(format!("no recipe for prerequisite '{tool}'")),
                    );
                }
            }
            RemediationStrategy::InstallSystemPackages => {
                if profile.package_manager.primary == PackageManager::None {
                    return (
                        Availability::Impossible,
                        Some("no package manager detected".to_string()),
                    );
                }
                if !option
                    .required_system_packages_by_family
                    .contains_key(&profile.distro.family)
                {
                    return (
                        Availability::Impossible,
                        Some(format!(
                            "no packages known for the {} family",
                            profile.distro.family
                        )),
                    );
                }
            }
            RemediationStrategy::RetrySameMethod
            | RemediationStrategy::RetryWithArgs { .. }
            | RemediationStrategy::SwitchMethod { .. }
            | RemediationStrategy::Manual { .. } => {}
        }

        (Availability::Ready, None)
    }

    /// Resolve the option's plan without executing to count its steps.
    async fn hypothetical_step_count(
        &self,
        option: &RemediationOptionDef,
        tool_id: &str,
        profile: &SystemProfile,
    ) -> u32 {
        let plan = match &option.strategy {
            RemediationStrategy::Manual { .. } => return 0,
            RemediationStrategy::RetrySameMethod
            | RemediationStrategy::RetryWithSudoSecret => {
                self.resolver.resolve(tool_id, profile).await
            }
            RemediationStrategy::RetryWithArgs { extra_args } => {
                let overrides = ResolveOverrides {
                    extra_args: extra_args.clone(),
                    ..ResolveOverrides::default()
                };
                self.resolver.resolve_with(tool_id, profile, &overrides).await
            }
            RemediationStrategy::SwitchMethod { family } => {
                let overrides = ResolveOverrides {
                    force_family: Some(*family),
                    ..ResolveOverrides::default()
                };
                self.resolver.resolve_with(tool_id, profile, &overrides).await
            }
            RemediationStrategy::InstallPrereq { tool } => {
                let overrides = ResolveOverrides {
                    force_reinstall: true,
                    ..ResolveOverrides::default()
                };
                self.resolver.resolve_with(tool, profile, &overrides).await
            }
            RemediationStrategy::InstallSystemPackages => {
                let overrides = ResolveOverrides {
                    extra_system_packages_by_family: option
                        .required_system_packages_by_family
                        .clone(),
                    ..ResolveOverrides::default()
                };
                self.resolver.resolve_with(tool_id, profile, &overrides).await
            }
        };

        match plan {
            Ok(plan) => plan.steps.len() as u32,
            Err(_) => option.step_count_est.unwrap_or(1),
        }
    }
}

/// What executing a chosen option amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionAction {
    /// Resolve and execute a plan.
    Execute {
        /// Tool to resolve; differs from the failed tool for prereq
        /// installs.
        tool_id: String,
        /// Overrides applied to the resolution.
        overrides: ResolveOverrides,
    },
    /// Nothing to execute; the operator acts by hand.
    Manual { instructions: String },
}

/// Map a chosen option to the action that implements it.
#[must_use]
pub fn action_for_option(tool_id: &str, option: &RemediationOptionDef) -> OptionAction {
    match &option.strategy {
        RemediationStrategy::Manual { instructions } => OptionAction::Manual {
            instructions: instructions.clone(),
        },
        RemediationStrategy::RetrySameMethod | RemediationStrategy::RetryWithSudoSecret => {
            OptionAction::Execute {
                tool_id: tool_id.to_string(),
                overrides: ResolveOverrides::default(),
            }
        }
        RemediationStrategy::RetryWithArgs { extra_args } => OptionAction::Execute {
            tool_id: tool_id.to_string(),
            overrides: ResolveOverrides {
                extra_args: extra_args.clone(),
                ..ResolveOverrides::default()
            },
        },
        RemediationStrategy::SwitchMethod { family } => OptionAction::Execute {
            tool_id: tool_id.to_string(),
            overrides: ResolveOverrides {
                force_family: Some(*family),
                ..ResolveOverrides::default()
            },
        },
        RemediationStrategy::InstallPrereq { tool } => OptionAction::Execute {
            tool_id: tool.clone(),
            overrides: ResolveOverrides {
                force_reinstall: true,
                ..ResolveOverrides::default()
            },
        },
        RemediationStrategy::InstallSystemPackages => OptionAction::Execute {
            tool_id: tool_id.to_string(),
            overrides: ResolveOverrides {
                extra_system_packages_by_family: option
                    .required_system_packages_by_family
                    .clone(),
                ..ResolveOverrides::default()
            },
        },
    }
}
