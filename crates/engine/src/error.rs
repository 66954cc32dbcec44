//! Engine error types.

use thiserror::Error;

/// Plan resolution and execution errors.
///
/// Every variant carries a stable category string for the HTTP layer and
/// a human-readable reason; none of them is retried automatically.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested tool has no recipe.
    #[error("unknown tool '{tool}'")]
    UnknownTool { tool: String },

    /// No install method in the recipe is viable for this host profile.
    #[error("no viable install method for '{tool}' on this system: {reason}")]
    NoViableMethod { tool: String, reason: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle involving '{tool}': {path}")]
    DepCycle { tool: String, path: String },

    /// A remediation request referenced a failure or option that does not
    /// exist on the recipe.
    #[error("unknown remediation reference '{reference}' for '{tool}'")]
    UnknownRemediation { tool: String, reference: String },

    /// The execution slot queue is full.
    #[error("executor pool saturated, retry later")]
    PoolSaturated,
}

impl EngineError {
    /// Stable category string surfaced in structured error responses.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "lookup",
            Self::NoViableMethod { .. } | Self::DepCycle { .. } => "plan",
            Self::UnknownRemediation { .. } => "remediation",
            Self::PoolSaturated => "capacity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = EngineError::UnknownTool {
            tool: "x".to_string(),
        };
        assert_eq!(err.category(), "lookup");

        let err = EngineError::NoViableMethod {
            tool: "x".to_string(),
            reason: "no method".to_string(),
        };
        assert_eq!(err.category(), "plan");
    }
}
