//! Escalation chain tracking.
//!
//! When a failed install leads the operator to an "install a prerequisite
//! first" option, the follow-up attempt is stitched to the original goal
//! with a shared chain id. The tracker keeps the per-operator chain graph
//! in memory, produces breadcrumbs for the UI, detects loops (the same
//! `(tool, failure)` pair appearing twice), and garbage-collects chains
//! after an hour of inactivity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Chains idle longer than this are garbage-collected.
pub const CHAIN_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Status of one chain node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Failed,
    Succeeded,
    Pending,
}

/// One breadcrumb on the path from the original goal to the current
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    /// Display label, e.g. `Install Ruff` or `Install pipx`.
    pub label: String,
    /// Zero-based depth from the original goal.
    pub depth: u32,
    /// Node status.
    pub status: NodeStatus,
}

/// Chain state attached to remediation responses and terminal events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    /// Shared chain id.
    pub chain_id: String,
    /// Depth of the current attempt.
    pub depth: u32,
    /// Path from the original goal to the current failure.
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Tool id the chain set out to install.
    pub original_goal: String,
    /// The attempt would revisit an already-seen failure.
    #[serde(default)]
    pub loop_detected: bool,
}

#[derive(Debug)]
struct ChainNode {
    tool_id: String,
    label: String,
    status: NodeStatus,
    depth: u32,
}

#[derive(Debug)]
struct Chain {
    original_goal: String,
    nodes: Vec<ChainNode>,
    seen_failures: Vec<(String, String)>,
    loop_detected: bool,
    last_activity: Instant,
}

impl Chain {
    fn summary(&self, chain_id: &str) -> ChainSummary {
        ChainSummary {
            chain_id: chain_id.to_string(),
            depth: self.nodes.last().map_or(0, |n| n.depth),
            breadcrumbs: self
                .nodes
                .iter()
                .map(|n| Breadcrumb {
                    label: n.label.clone(),
                    depth: n.depth,
                    status: n.status,
                })
                .collect(),
            original_goal: self.original_goal.clone(),
            loop_detected: self.loop_detected,
        }
    }
}

/// In-memory, per-operator chain graph.
#[derive(Debug, Default)]
pub struct ChainTracker {
    chains: Mutex<HashMap<String, Chain>>,
}

impl ChainTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a chain at its original goal. Returns the chain id.
    pub fn start(&self, tool_id: &str, label: &str) -> String {
        let chain_id = Uuid::new_v4().to_string();
        let mut chains = self.lock_and_sweep();
        chains.insert(
            chain_id.clone(),
            Chain {
                original_goal: tool_id.to_string(),
                nodes: vec![ChainNode {
                    tool_id: tool_id.to_string(),
                    label: label.to_string(),
                    status: NodeStatus::Pending,
                    depth: 0,
                }],
                seen_failures: Vec::new(),
                loop_detected: false,
                last_activity: Instant::now(),
            },
        );
        chain_id
    }

    /// Record a follow-up attempt on an existing chain at depth+1.
    ///
    /// Unknown chain ids (expired or bogus) start a fresh chain so the
    /// caller always gets a usable id back.
    pub fn begin_attempt(&self, chain_id: &str, tool_id: &str, label: &str) -> String {
        let mut chains = self.lock_and_sweep();
        let Some(chain) = chains.get_mut(chain_id) else {
            drop(chains);
            debug!("chain {chain_id} unknown or expired, starting fresh");
            return self.start(tool_id, label);
        };
        let depth = chain.nodes.last().map_or(0, |n| n.depth) + 1;
        chain.nodes.push(ChainNode {
            tool_id: tool_id.to_string(),
            label: label.to_string(),
            status: NodeStatus::Pending,
            depth,
        });
        chain.last_activity = Instant::now();
        chain_id.to_string()
    }

    /// Record a failure on the chain's current attempt and return the
    /// updated summary. Sets `loop_detected` when `(tool_id, failure_id)`
    /// was already seen on this chain.
    pub fn record_failure(
        &self,
        chain_id: &str,
        tool_id: &str,
        failure_id: &str,
    ) -> Option<ChainSummary> {
        let mut chains = self.lock_and_sweep();
        let chain = chains.get_mut(chain_id)?;

        let key = (tool_id.to_string(), failure_id.to_string());
        if chain.seen_failures.contains(&key) {
            chain.loop_detected = true;
        } else {
            chain.seen_failures.push(key);
        }

        if let Some(node) = chain
            .nodes
            .iter_mut()
            .rev()
            .find(|n| n.tool_id == tool_id)
        {
            node.status = NodeStatus::Failed;
        }
        chain.last_activity = Instant::now();
        Some(chain.summary(chain_id))
    }

    /// Record a success. When the succeeding tool is the original goal the
    /// chain is complete and removed; otherwise the summary of the still
    /// open chain is returned.
    pub fn record_success(&self, chain_id: &str, tool_id: &str) -> Option<ChainSummary> {
        let mut chains = self.lock_and_sweep();
        let chain = chains.get_mut(chain_id)?;

        if let Some(node) = chain
            .nodes
            .iter_mut()
            .rev()
            .find(|n| n.tool_id == tool_id)
        {
            node.status = NodeStatus::Succeeded;
        }
        chain.last_activity = Instant::now();

        if chain.original_goal == tool_id {
            let done = chains.remove(chain_id);
            return done.map(|c| c.summary(chain_id));
        }
        Some(chain.summary(chain_id))
    }

    /// Drop a chain on operator cancel.
    pub fn cancel(&self, chain_id: &str) {
        self.lock_and_sweep().remove(chain_id);
    }

    /// Current summary of a chain.
    pub fn summary(&self, chain_id: &str) -> Option<ChainSummary> {
        let chains = self.lock_and_sweep();
        chains.get(chain_id).map(|c| c.summary(chain_id))
    }

    /// Number of live chains.
    pub fn len(&self) -> usize {
        self.lock_and_sweep().len()
    }

    /// True when no chain is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_and_sweep(&self) -> std::sync::MutexGuard<'_, HashMap<String, Chain>> {
        let mut chains = self.chains.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        chains.retain(|id, chain| {
            let keep = chain.last_activity.elapsed() < CHAIN_IDLE_TTL;
            if !keep {
                debug!("garbage-collecting idle chain {id}");
            }
            keep
        });
        chains
    }
}
