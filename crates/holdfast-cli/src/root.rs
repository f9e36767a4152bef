use std::path::{Path, PathBuf};

use holdfast_core::paths;

/// Resolve the project root directory.
///
/// Priority:
/// 1. `--root` flag / `HOLDFAST_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.holdfast/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_project_root(&cwd).unwrap_or(cwd)
}

fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(paths::HOLDFAST_DIR).is_dir())
        .map(Path::to_path_buf)
}
