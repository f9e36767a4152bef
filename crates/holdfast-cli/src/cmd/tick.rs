use chrono::Utc;
use holdfast_core::ActorHost;
use std::path::Path;

use crate::output::print_json;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let host = ActorHost::open(root)?;
    let report = host.tick(Utc::now())?;

    if json {
        return print_json(&report);
    }
    println!(
        "fired: {}  failed: {}  skipped: {}",
        report.fired, report.failed, report.skipped
    );
    Ok(())
}
