//! Failure handler matching.
//!
//! A failed step is classified by a first-match scan over three layers:
//! handlers scoped to the step's method family, then the recipe's generic
//! handlers, then the global infrastructure table. A handler matches when
//! its exit-code constraint (if any) holds and its pattern is found in
//! the stderr tail.

use serde::{Deserialize, Serialize};
use tracing::debug;

use opsdeck_recipes::{FailureHandlerDef, MethodFamily, Recipe, INFRA_HANDLERS};

/// Which layer produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedLayer {
    MethodFamily,
    RecipeGeneric,
    Infra,
    None,
}

/// A classified failure.
#[derive(Debug, Clone)]
pub struct MatchedFailure {
    /// The matched handler definition.
    pub handler: FailureHandlerDef,
    /// Layer the handler came from.
    pub layer: MatchedLayer,
}

/// Classify a failed step. Returns `None` when nothing matches.
#[must_use]
pub fn match_failure(
    recipe: Option<&Recipe>,
    method_family: Option<MethodFamily>,
    exit_code: Option<i32>,
    stderr_tail: &str,
) -> Option<MatchedFailure> {
    if let Some(recipe) = recipe {
        // Layer 1: handlers scoped to the failing step's method family.
        if let Some(family) = method_family {
            for (handler, regex) in recipe.handlers() {
                if handler.method_family == Some(family)
                    && constraint_holds(handler, exit_code)
                    && regex.is_match(stderr_tail)
                {
                    debug!(
                        "matched method-family handler {}/{}",
                        recipe.spec.id, handler.failure_id
                    );
                    return Some(MatchedFailure {
                        handler: handler.clone(),
                        layer: MatchedLayer::MethodFamily,
                    });
                }
            }
        }

        // Layer 2: the recipe's generic handlers.
        for (handler, regex) in recipe.handlers() {
            if handler.method_family.is_none()
                && constraint_holds(handler, exit_code)
                && regex.is_match(stderr_tail)
            {
                debug!(
                    "matched generic handler {}/{}",
                    recipe.spec.id, handler.failure_id
                );
                return Some(MatchedFailure {
                    handler: handler.clone(),
                    layer: MatchedLayer::RecipeGeneric,
                });
            }
        }
    }

    // Layer 3: infrastructure handlers.
    for infra in INFRA_HANDLERS.iter() {
        if constraint_holds(&infra.def, exit_code) && infra.regex.is_match(stderr_tail) {
            debug!("matched infra handler {}", infra.def.failure_id);
            return Some(MatchedFailure {
                handler: infra.def.clone(),
                layer: MatchedLayer::Infra,
            });
        }
    }

    None
}

fn constraint_holds(handler: &FailureHandlerDef, exit_code: Option<i32>) -> bool {
    match handler.exit_code {
        None => true,
        Some(expected) => exit_code == Some(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdeck_recipes::{builtin_catalog, RecipeRegistry};
    use std::sync::Arc;

    fn registry() -> Arc<RecipeRegistry> {
        Arc::new(RecipeRegistry::new(builtin_catalog()).unwrap())
    }

    #[test]
    fn test_method_family_handler_matches_first() {
        let registry = registry();
        let recipe = registry.lookup("ruff").unwrap();
        let matched = match_failure(
            Some(recipe),
            Some(MethodFamily::Pip),
            Some(1),
            "error: externally-managed-environment",
        )
        .unwrap();
        assert_eq!(matched.handler.failure_id, "pep668");
        assert_eq!(matched.layer, MatchedLayer::MethodFamily);
    }

    #[test]
    fn test_family_scoped_handler_skipped_for_other_family() {
        let registry = registry();
        let recipe = registry.lookup("ruff").unwrap();
        // pep668 is scoped to pip; a brew step with the same stderr falls
        // through to infra (no match there either).
        let matched = match_failure(
            Some(recipe),
            Some(MethodFamily::Brew),
            Some(1),
            "error: externally-managed-environment",
        );
        assert!(matched.is_none());
    }

    #[test]
    fn test_generic_recipe_handler() {
        let registry = registry();
        let recipe = registry.lookup("cargo-audit").unwrap();
        // linker_missing is unscoped.
        let matched = match_failure(
            Some(recipe),
            Some(MethodFamily::Cargo),
            Some(101),
            "error: linker `cc` not found",
        )
        .unwrap();
        assert_eq!(matched.handler.failure_id, "linker_missing");
        assert_eq!(matched.layer, MatchedLayer::RecipeGeneric);
    }

    #[test]
    fn test_infra_fallback() {
        let registry = registry();
        let recipe = registry.lookup("ruff").unwrap();
        let matched = match_failure(
            Some(recipe),
            Some(MethodFamily::Pip),
            Some(1),
            "curl: (6) Could not resolve host: pypi.org",
        )
        .unwrap();
        assert_eq!(matched.handler.failure_id, "network_unreachable");
        assert_eq!(matched.layer, MatchedLayer::Infra);
    }

    #[test]
    fn test_exit_code_constraint() {
        // oom_killed requires exit 137.
        let matched = match_failure(None, None, Some(137), "c++: fatal error: Killed signal");
        assert_eq!(matched.unwrap().handler.failure_id, "oom_killed");

        let matched = match_failure(None, None, Some(1), "c++: fatal error: Killed signal");
        assert!(matched.is_none());
    }

    #[test]
    fn test_unhandled_failure() {
        let matched = match_failure(None, None, Some(1), "some completely novel breakage");
        assert!(matched.is_none());
    }

    #[test]
    fn test_rustc_too_old_scenario() {
        let registry = registry();
        let recipe = registry.lookup("cargo-audit").unwrap();
        let matched = match_failure(
            Some(recipe),
            Some(MethodFamily::Cargo),
            Some(101),
            "error: cargo-audit v0.21.0 requires rustc 1.85 or newer, while the currently \
             active rustc version is 1.75.0",
        )
        .unwrap();
        assert_eq!(matched.handler.failure_id, "rustc_too_old");
        assert_eq!(matched.layer, MatchedLayer::MethodFamily);
    }
}
