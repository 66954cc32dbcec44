//! Project state layer.
//!
//! Two long-lived services with explicit init: the devops cache (TTL and
//! input-mtime keyed memo with client/server generation coherence) and
//! the append-only audit writer. Both live under the project's `.state/`
//! directory.

pub mod audit;
pub mod cache;

use std::path::{Path, PathBuf};

pub use audit::{new_operation_id, AuditEntry, AuditPage, AuditQuery, AuditWriter};
pub use cache::{CacheEntry, CacheSnapshot, DevopsCache, Invalidate, DEFAULT_CARD_TTL};

/// Conventional state directory under the project root.
pub const STATE_DIR: &str = ".state";

/// Cache file path under a project root.
#[must_use]
pub fn cache_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join("devops_cache.json")
}

/// Audit log path under a project root.
#[must_use]
pub fn audit_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join("audit.ndjson")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_paths() {
        let root = Path::new("/work/project");
        assert_eq!(
            cache_path(root),
            Path::new("/work/project/.state/devops_cache.json")
        );
        assert_eq!(audit_path(root), Path::new("/work/project/.state/audit.ndjson"));
    }
}
