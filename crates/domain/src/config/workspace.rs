use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkspaceConfig {
    /// Explicit workspace root. When unset, the root is resolved by
    /// walking up from the CWD to the nearest repo marker.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Markers that identify a workspace root.
const ROOT_MARKERS: [&str; 2] = [".git", ".brewva"];

/// Resolve the workspace root: the nearest ancestor of `start` that
/// contains a repo marker, else `start` itself.
pub fn resolve_workspace_root(start: &Path) -> PathBuf {
    let mut dir = start;
    loop {
        for marker in ROOT_MARKERS {
            if dir.join(marker).exists() {
                return dir.to_path_buf();
            }
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return start.to_path_buf(),
        }
    }
}

/// The orchestrator state directory under a workspace root.
pub fn orchestrator_dir(root: &Path) -> PathBuf {
    root.join(".orchestrator")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_to_marker_ancestor() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repo");
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();

        assert_eq!(resolve_workspace_root(&nested), root);
    }

    #[test]
    fn falls_back_to_start() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plain");
        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(resolve_workspace_root(&dir), dir);
    }
}
