use chrono::Utc;
use clap::Subcommand;
use holdfast_core::token::TokenSigner;
use holdfast_core::types::ActorKey;
use std::path::Path;

use crate::output::print_json;

#[derive(Subcommand)]
pub enum TokenSubcommand {
    /// Check an intervention token against an actor without using it
    Verify {
        token: String,
        /// Actor the token must be bound to (kind/id)
        #[arg(long)]
        actor: String,
    },
}

pub fn run(root: &Path, subcommand: TokenSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        TokenSubcommand::Verify { token, actor } => verify(root, &token, &actor, json),
    }
}

fn verify(root: &Path, token: &str, actor: &str, json: bool) -> anyhow::Result<()> {
    let key: ActorKey = actor.parse()?;
    let signer = TokenSigner::load_or_create(root)?;
    let claims = signer.verify(token, &key, Utc::now())?;

    if json {
        return print_json(&claims);
    }
    println!("valid token for {}", claims.actor);
    if let Some(expires) = claims.expires_at_utc() {
        println!("  expires: {}", expires.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}
