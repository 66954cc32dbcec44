//! Install recipe catalog.
//!
//! The static knowledge base of the install engine: recipe definitions
//! (methods, dependencies, system packages, verify commands), failure
//! handlers with remediation options, the global infrastructure handler
//! table, and the immutable registry that validates all of it at startup.

pub mod builtin;
pub mod infra;
pub mod loader;
pub mod registry;
pub mod types;

pub use builtin::builtin_catalog;
pub use infra::{InfraHandler, INFRA_HANDLERS};
pub use loader::{load_dir, LoadError};
pub use registry::{Recipe, RecipeRegistry, RegistryError};
pub use types::{
    FailureHandlerDef, LockCondition, MethodEntry, MethodFamily, RecipeDef, RemediationOptionDef,
    RemediationStrategy, Risk, ANY_PM,
};

/// Build the process-wide registry: builtins plus an optional catalog
/// directory whose recipes extend or shadow them.
pub fn load_registry(
    catalog_dir: Option<&std::path::Path>,
) -> Result<RecipeRegistry, RegistryLoadError> {
    let mut defs = builtin_catalog();
    if let Some(dir) = catalog_dir {
        defs.extend(load_dir(dir)?);
    }
    Ok(RecipeRegistry::new(defs)?)
}

/// Error building the registry at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryLoadError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Validate(#[from] RegistryError),
}
