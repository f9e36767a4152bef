use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const HOLDFAST_DIR: &str = ".holdfast";

pub const CONFIG_FILE: &str = ".holdfast/config.yaml";
pub const STATE_DB_FILE: &str = ".holdfast/state.redb";
pub const TASKS_DB_FILE: &str = ".holdfast/tasks.redb";
pub const SIGNING_KEY_FILE: &str = ".holdfast/signing.key";

/// Environment variable that overrides the on-disk signing key.
pub const SIGNING_KEY_ENV: &str = "HOLDFAST_SIGNING_KEY";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn holdfast_dir(root: &Path) -> PathBuf {
    root.join(HOLDFAST_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_db_path(root: &Path) -> PathBuf {
    root.join(STATE_DB_FILE)
}

pub fn tasks_db_path(root: &Path) -> PathBuf {
    root.join(TASKS_DB_FILE)
}

pub fn signing_key_path(root: &Path) -> PathBuf {
    root.join(SIGNING_KEY_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_lives_under_holdfast_dir() {
        let root = Path::new("/srv/app");
        for p in [
            config_path(root),
            state_db_path(root),
            tasks_db_path(root),
            signing_key_path(root),
        ] {
            assert!(p.starts_with(holdfast_dir(root)), "{}", p.display());
        }
    }
}
