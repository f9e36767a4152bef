use holdfast_core::scheduler::TaskStatus;
use holdfast_core::types::ActorKey;
use holdfast_core::ActorHost;
use std::path::Path;

use crate::output::{print_json, print_table};

pub fn run(root: &Path, actor: Option<&str>, json: bool) -> anyhow::Result<()> {
    let host = ActorHost::open(root)?;
    let tasks = match actor {
        Some(a) => host.tasks().list_for_actor(&a.parse::<ActorKey>()?)?,
        None => host.tasks().list_all()?,
    };

    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No scheduled tasks.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|t| {
            let status = match &t.status {
                TaskStatus::Failed { reason } => format!("failed ({reason})"),
                other => other.label().to_string(),
            };
            vec![
                t.id.to_string(),
                t.actor.to_string(),
                t.method.clone(),
                status,
                t.not_before.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "ACTOR", "METHOD", "STATUS", "NOT BEFORE"], &rows);
    Ok(())
}
