//! Tool-install engine.
//!
//! Resolves install plans against a host profile, executes them as
//! supervised tasks with streaming events, classifies failures against
//! recipe and infrastructure handler tables, and builds the remediation
//! responses the operator picks from. Escalation chains link successive
//! attempts and detect loops.

pub mod chain;
pub mod error;
pub mod events;
pub mod executor;
pub mod matcher;
pub mod plan;
pub mod probe;
pub mod remediate;
pub mod resolve;
pub mod sudo;

pub use chain::{Breadcrumb, ChainSummary, ChainTracker, NodeStatus, CHAIN_IDLE_TTL};
pub use error::EngineError;
pub use events::ExecutionEvent;
pub use executor::{ExecutionHandle, InstallEngine};
pub use matcher::{match_failure, MatchedFailure, MatchedLayer};
pub use plan::{ExpectedExit, InstallPlan, InstallStep, StepKind, StepProduct};
pub use probe::{HostProbe, SystemProbe};
pub use remediate::{
    action_for_option, Availability, FailureInfo, Fallback, FallbackAction, OptionAction,
    RemediationOptionView, RemediationPlanner, RemediationResponse,
};
pub use resolve::{ResolveOverrides, Resolver};
