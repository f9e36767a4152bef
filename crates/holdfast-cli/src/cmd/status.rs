use holdfast_core::ActorHost;
use std::path::Path;

use crate::output::print_json;

pub fn run(root: &Path, kind: &str, id: &str, json: bool) -> anyhow::Result<()> {
    let host = ActorHost::open(root)?;
    let key = host.actor_key(kind, id)?;
    let status = host.status(&key)?;

    if json {
        return print_json(&status);
    }

    println!("Actor:      {}", status.actor);
    println!("Migration:  {}", status.migration);
    match status.single_flight.outstanding_task_id {
        Some(id) => println!("Follow-up:  {id}"),
        None => println!("Follow-up:  none"),
    }
    println!("Review:     {}", status.review.status);
    if let Some(expires) = status.review.token_expires_at {
        println!("  token expires: {}", expires.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if !status.review.data.is_null() {
        println!("  data: {}", status.review.data);
    }

    let pending = status.tasks.iter().filter(|t| t.is_pending()).count();
    println!("Tasks:      {} total, {pending} pending", status.tasks.len());
    Ok(())
}
