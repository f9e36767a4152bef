use anyhow::Context;
use holdfast_core::config::Config;
use holdfast_core::token::TokenSigner;
use holdfast_core::{io, paths, ActorHost};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing holdfast in: {}", root.display());

    // 1. Create .holdfast/
    let dir = paths::holdfast_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    // 2. Write config.yaml if missing
    let config_path = paths::config_path(root);
    if !config_path.exists() {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    // 3. Signing key, unless one is supplied through the environment
    if std::env::var_os(paths::SIGNING_KEY_ENV).is_some() {
        println!("  using:   ${}", paths::SIGNING_KEY_ENV);
    } else {
        let existed = paths::signing_key_path(root).exists();
        TokenSigner::load_or_create(root).context("failed to prepare signing key")?;
        report(existed, paths::SIGNING_KEY_FILE);
    }

    // 4. Databases
    let state_existed = paths::state_db_path(root).exists();
    let tasks_existed = paths::tasks_db_path(root).exists();
    ActorHost::open(root).context("failed to open databases")?;
    report(state_existed, paths::STATE_DB_FILE);
    report(tasks_existed, paths::TASKS_DB_FILE);

    println!("\nReady. Start the server with `holdfast serve`.");
    Ok(())
}

fn report(existed: bool, path: &str) {
    if existed {
        println!("  exists:  {path}");
    } else {
        println!("  created: {path}");
    }
}
