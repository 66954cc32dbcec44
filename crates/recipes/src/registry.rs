//! The immutable recipe registry.
//!
//! Built once at startup from the builtin catalog plus any on-disk
//! catalog files, validated eagerly, and shared read-only for the process
//! lifetime. A validation failure is a fatal load error: a registry that
//! loads is a registry whose handlers all compile and whose dependency
//! edges all resolve.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

use crate::types::{FailureHandlerDef, RecipeDef};

/// Fatal catalog validation error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate recipe id '{tool}'")]
    DuplicateTool { tool: String },

    #[error("recipe '{tool}' declares no install methods")]
    NoMethods { tool: String },

    #[error("recipe '{tool}' has an empty verify command")]
    EmptyVerify { tool: String },

    #[error("recipe '{tool}' depends on unknown tool '{dep}'")]
    MissingDep { tool: String, dep: String },

    #[error("recipe '{tool}' declares failure id '{failure_id}' twice")]
    DuplicateFailureId { tool: String, failure_id: String },

    #[error("recipe '{tool}' handler '{failure_id}' has an invalid pattern: {source}")]
    InvalidPattern {
        tool: String,
        failure_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("recipe '{tool}' handler '{failure_id}' has no example stderr")]
    ExampleMissing { tool: String, failure_id: String },

    #[error("recipe '{tool}' example stderr for '{failure_id}' does not match its pattern")]
    ExampleMismatch { tool: String, failure_id: String },

    #[error("recipe '{tool}' has example stderr for unknown failure id '{failure_id}'")]
    ExampleOrphaned { tool: String, failure_id: String },

    #[error("recipe '{tool}' handler '{failure_id}' option '{option}' declares no strategy target")]
    BadOption {
        tool: String,
        failure_id: String,
        option: String,
    },
}

/// A recipe with its handler patterns compiled.
#[derive(Debug, Clone)]
pub struct Recipe {
    /// The validated definition.
    pub spec: RecipeDef,
    /// One compiled regex per `spec.on_failure` entry, same order.
    patterns: Vec<Regex>,
}

impl Recipe {
    /// Handlers paired with their compiled patterns, in match order.
    pub fn handlers(&self) -> impl Iterator<Item = (&FailureHandlerDef, &Regex)> {
        self.spec.on_failure.iter().zip(self.patterns.iter())
    }

    /// Look up one handler by failure id.
    #[must_use]
    pub fn handler(&self, failure_id: &str) -> Option<(&FailureHandlerDef, &Regex)> {
        self.handlers().find(|(h, _)| h.failure_id == failure_id)
    }
}

/// Process-wide, read-only recipe catalog.
#[derive(Debug)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Recipe>,
}

impl RecipeRegistry {
    /// Build and validate a registry from recipe definitions.
    ///
    /// Later definitions override earlier ones with the same id, which is
    /// how on-disk catalog files shadow builtins.
    pub fn new(defs: Vec<RecipeDef>) -> Result<Self, RegistryError> {
        let mut merged: Vec<RecipeDef> = Vec::new();
        for def in defs {
            if let Some(slot) = merged.iter_mut().find(|r| r.id == def.id) {
                debug!("catalog overrides builtin recipe '{}'", def.id);
                *slot = def;
            } else {
                merged.push(def);
            }
        }

        let known: BTreeSet<String> = merged.iter().map(|r| r.id.clone()).collect();

        let mut recipes = HashMap::new();
        for def in merged {
            let compiled = compile_recipe(def, &known)?;
            if recipes.insert(compiled.spec.id.clone(), compiled).is_some() {
                // Shadowing above removed duplicates; reaching here means
                // two defs with the same id survived the merge.
                unreachable!("duplicate recipe id survived merge");
            }
        }

        Ok(Self { recipes })
    }

    /// Look up a recipe by tool id.
    #[must_use]
    pub fn lookup(&self, tool_id: &str) -> Option<&Recipe> {
        self.recipes.get(tool_id)
    }

    /// All known tool ids, sorted.
    #[must_use]
    pub fn all_ids(&self) -> BTreeSet<String> {
        self.recipes.keys().cloned().collect()
    }

    /// Number of recipes in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// True when the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

fn compile_recipe(def: RecipeDef, known: &BTreeSet<String>) -> Result<Recipe, RegistryError> {
    let tool = def.id.clone();

    if def.methods.is_empty() {
        return Err(RegistryError::NoMethods { tool });
    }
    if def.verify.is_empty() {
        return Err(RegistryError::EmptyVerify { tool });
    }

    for dep in &def.deps {
        if !known.contains(dep) {
            return Err(RegistryError::MissingDep {
                tool,
                dep: dep.clone(),
            });
        }
    }

    let mut seen_failure_ids = BTreeSet::new();
    let mut patterns = Vec::with_capacity(def.on_failure.len());

    for handler in &def.on_failure {
        if !seen_failure_ids.insert(handler.failure_id.clone()) {
            return Err(RegistryError::DuplicateFailureId {
                tool,
                failure_id: handler.failure_id.clone(),
            });
        }

        let regex = Regex::new(&handler.pattern).map_err(|source| RegistryError::InvalidPattern {
            tool: tool.clone(),
            failure_id: handler.failure_id.clone(),
            source,
        })?;

        let example = def.example_stderr_by_failure_id.get(&handler.failure_id).ok_or_else(
            || RegistryError::ExampleMissing {
                tool: tool.clone(),
                failure_id: handler.failure_id.clone(),
            },
        )?;
        if !regex.is_match(example) {
            return Err(RegistryError::ExampleMismatch {
                tool,
                failure_id: handler.failure_id.clone(),
            });
        }

        for option in &handler.options {
            if option.id.is_empty() {
                return Err(RegistryError::BadOption {
                    tool: tool.clone(),
                    failure_id: handler.failure_id.clone(),
                    option: option.label.clone(),
                });
            }
        }

        patterns.push(regex);
    }

    for failure_id in def.example_stderr_by_failure_id.keys() {
        if !seen_failure_ids.contains(failure_id) {
            return Err(RegistryError::ExampleOrphaned {
                tool,
                failure_id: failure_id.clone(),
            });
        }
    }

    Ok(Recipe { spec: def, patterns })
}
