use std::time::Duration;

use tw_core::update_bus::UpdateKind;

use super::Context;
use crate::render;

/// Run the `tasks` subcommand: wait for the daemon's task list and print it.
pub async fn run(ctx: &Context, wait_secs: u64, json: bool) -> anyhow::Result<()> {
    let updates = ctx.engine.subscribe_updates();

    // The daemon sends the full list as soon as the stream connects. An
    // empty list produces no update, so this wait is bounded.
    let _ = tokio::time::timeout(Duration::from_secs(wait_secs), async {
        while let Ok(update) = updates.recv_async().await {
            if update.kind == UpdateKind::Overview {
                break;
            }
        }
    })
    .await;
    ctx.engine.flush().await?;

    let store = ctx.engine.store().read();
    let tasks: Vec<_> = store
        .tasks_by_recency()
        .into_iter()
        .map(|t| &t.overview)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    println!("{:<24} {:<10} {:<16} NAME", "ID", "STATUS", "CREATED");
    for task in tasks {
        println!("{}", render::task_line(task));
    }
    Ok(())
}
