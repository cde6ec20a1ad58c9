use tracing::Instrument;
use tw_api_types::{QueuedMessage, TaskStatus};
use tw_core::subscription::SharedView;
use tw_core::update_bus::UpdateKind;
use tw_telemetry::spans::task_span;

use super::{friendly_error, Context};
use crate::render::{self, EventPrinter};

/// Run the `watch` subcommand: open the task and print changes until
/// Ctrl-C (or until the task is idle with `--until-idle`).
pub async fn run(ctx: &Context, task_id: &str, until_idle: bool) -> anyhow::Result<()> {
    let updates = ctx.engine.subscribe_updates();
    let task = ctx
        .session
        .open_task(task_id)
        .await
        .map_err(friendly_error)?;
    println!("{}", render::task_line(&task));

    let follow = async {
        let mut printer = EventPrinter::default();
        let mut seen_content = false;

        loop {
            let update = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                update = updates.recv_async() => match update {
                    Ok(update) => update,
                    Err(_) => break,
                },
            };
            if update.task_id.as_deref() != Some(task_id) {
                continue;
            }
            let Some(state) = ctx.engine.store().read().snapshot(task_id) else {
                continue;
            };

            match update.kind {
                UpdateKind::Overview => println!("status: {}", state.status()),
                UpdateKind::Content(change) => {
                    seen_content = true;
                    if change.events {
                        for line in printer.diff(&state.events) {
                            println!("{line}");
                        }
                    }
                    if change.todos {
                        println!("todos:");
                        for todo in &state.todos {
                            println!("  {}", render::todo_line(todo));
                        }
                    }
                    if change.queue {
                        for line in queue_panel(ctx.engine.view(), &state.input_queue) {
                            println!("{line}");
                        }
                    }
                }
                UpdateKind::Selection => {}
            }

            if until_idle && seen_content && state.status() == TaskStatus::Idle {
                break;
            }
        }
    };

    follow.instrument(task_span(&ctx.run_id, task_id)).await;
    Ok(())
}

/// Lines for the input queue panel. The panel is open while the queue has
/// entries; the open flag lives in the view's scratch state so it resets
/// whenever another task is selected.
fn queue_panel(view: &SharedView, queue: &[QueuedMessage]) -> Vec<String> {
    let was_open = view.snapshot().scratch.queue_panel_open;
    let open = !queue.is_empty();
    view.update_scratch(|scratch| scratch.queue_panel_open = open);

    if !open {
        return if was_open {
            vec!["input queue cleared".to_string()]
        } else {
            Vec::new()
        };
    }
    let mut lines = vec![format!("input queue: {} pending", queue.len())];
    lines.extend(queue.iter().map(|m| format!("  {}", render::queue_line(m))));
    lines
}
