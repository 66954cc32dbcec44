//! On-disk catalog loading.
//!
//! Recipes load from a directory of JSON files at startup. One file holds
//! one or more recipe objects keyed by tool id; the embedded `id` field
//! must agree with the key. The schema is strict: unknown keys anywhere
//! are a fatal load error, so catalog typos surface at startup instead of
//! silently changing behavior.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::RecipeDef;

/// Fatal catalog file error.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read catalog directory {dir}: {source}")]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read catalog file {file}: {source}")]
    ReadFile {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog file {file} is not valid recipe JSON: {source}")]
    Parse {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("catalog file {file} keys recipe '{key}' whose id field is '{id}'")]
    KeyMismatch {
        file: PathBuf,
        key: String,
        id: String,
    },
}

/// Load every `*.json` file under `dir`, in filename order.
///
/// A missing directory is not an error: the builtin catalog alone is a
/// valid configuration.
pub fn load_dir(dir: &Path) -> Result<Vec<RecipeDef>, LoadError> {
    if !dir.exists() {
        debug!("no catalog directory at {}, using builtins only", dir.display());
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::ReadDir {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut recipes = Vec::new();
    for file in files {
        recipes.extend(load_file(&file)?);
    }

    if !recipes.is_empty() {
        info!("loaded {} recipes from {}", recipes.len(), dir.display());
    }
    Ok(recipes)
}

/// Load one catalog file: a JSON object mapping tool id → recipe.
pub fn load_file(file: &Path) -> Result<Vec<RecipeDef>, LoadError> {
    let contents = std::fs::read_to_string(file).map_err(|source| LoadError::ReadFile {
        file: file.to_path_buf(),
        source,
    })?;

    let by_id: BTreeMap<String, RecipeDef> =
        serde_json::from_str(&contents).map_err(|source| LoadError::Parse {
            file: file.to_path_buf(),
            source,
        })?;

    let mut recipes = Vec::with_capacity(by_id.len());
    for (key, recipe) in by_id {
        if recipe.id != key {
            return Err(LoadError::KeyMismatch {
                file: file.to_path_buf(),
                key,
                id: recipe.id,
            });
        }
        recipes.push(recipe);
    }
    Ok(recipes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const VALID_CATALOG: &str = r#"{
        "shellcheck": {
            "id": "shellcheck",
            "label": "ShellCheck",
            "category": "linting",
            "methods": [
                {
                    "family": "apt",
                    "commands_by_pm": {
                        "apt": ["apt-get", "install", "-y", "shellcheck"]
                    }
                }
            ],
            "verify": ["shellcheck", "--version"]
        }
    }"#;

    fn write_catalog(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_valid_catalog() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(dir.path(), "lint.json", VALID_CATALOG);

        let recipes = load_dir(dir.path()).unwrap();
        assert_eq!(recipes.len(), 1);
        assert_eq!(recipes[0].id, "shellcheck");
        assert_eq!(recipes[0].methods.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let recipes = load_dir(Path::new("/nonexistent/catalog-xyz")).unwrap();
        assert!(recipes.is_empty());
    }

    #[test]
    fn test_non_json_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(dir.path(), "notes.txt", "not json");
        write_catalog(dir.path(), "lint.json", VALID_CATALOG);

        let recipes = load_dir(dir.path()).unwrap();
        assert_eq!(recipes.len(), 1);
    }

    #[test]
    fn test_unknown_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bad = VALID_CATALOG.replace("\"category\": \"linting\",", "\"category\": \"linting\", \"sneaky\": 1,");
        write_catalog(dir.path(), "bad.json", &bad);

        let err = load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn test_key_id_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bad = VALID_CATALOG.replace("\"id\": \"shellcheck\"", "\"id\": \"other\"");
        write_catalog(dir.path(), "bad.json", &bad);

        let err = load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::KeyMismatch { .. }));
    }

    #[test]
    fn test_files_load_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let second = VALID_CATALOG.replace("shellcheck", "zzz-tool");
        write_catalog(dir.path(), "b.json", &second);
        write_catalog(dir.path(), "a.json", VALID_CATALOG);

        let recipes = load_dir(dir.path()).unwrap();
        assert_eq!(recipes[0].id, "shellcheck");
        assert_eq!(recipes[1].id, "zzz-tool");
    }
}
