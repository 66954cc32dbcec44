//! Install plans and steps.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use opsdeck_recipes::MethodFamily;

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// What kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Install native packages through the host package manager.
    SystemPkgs,
    /// Install a dependency tool.
    InstallDep,
    /// Install the requested tool itself.
    InstallTarget,
    /// Advisory environment exports; recorded, never executed.
    PostEnv,
    /// Prove the tool is installed.
    Verify,
}

/// Expected exit status of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedExit {
    /// Exit 0 or the step failed.
    #[default]
    Zero,
    /// Any exit status is fine (advisory steps).
    Any,
}

/// What a completed step leaves installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepProduct {
    /// A tool is now on PATH.
    Tool { id: String },
    /// Native packages are now present.
    Packages { names: Vec<String> },
    /// Nothing durable (verify, post-env).
    Nothing,
}

/// One atomic unit of plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStep {
    /// Step kind.
    pub kind: StepKind,
    /// Human label shown in the stream.
    pub label: String,
    /// Argv vector. Empty only for `PostEnv` steps.
    pub command: Vec<String>,
    /// Run under the sudo driver.
    pub needs_sudo: bool,
    /// Per-step timeout in seconds.
    pub timeout_secs: u64,
    /// Expected exit status.
    #[serde(default)]
    pub expected_exit: ExpectedExit,
    /// What the step leaves installed.
    pub produces: StepProduct,
    /// Method family the step was derived from, for handler scoping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_family: Option<MethodFamily>,
}

impl InstallStep {
    /// The step timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Ordered list of steps plus resolution metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPlan {
    /// Tool the plan installs.
    pub tool_id: String,
    /// Opaque id of the profile snapshot the plan was resolved against.
    pub profile_snapshot_id: String,
    /// Steps in execution order. Empty iff `already_installed`.
    pub steps: Vec<InstallStep>,
    /// The verify command succeeded before planning; nothing to do.
    pub already_installed: bool,
    /// True iff any step needs sudo.
    pub needs_sudo_overall: bool,
    /// Installs inside an ephemeral container will not survive a restart.
    #[serde(default)]
    pub advisory_ephemeral: bool,
}

impl InstallPlan {
    /// An empty plan for a tool that is already present.
    #[must_use]
    pub fn already_installed(tool_id: &str, profile_snapshot_id: &str) -> Self {
        Self {
            tool_id: tool_id.to_string(),
            profile_snapshot_id: profile_snapshot_id.to_string(),
            steps: Vec::new(),
            already_installed: true,
            needs_sudo_overall: false,
            advisory_ephemeral: false,
        }
    }
}
