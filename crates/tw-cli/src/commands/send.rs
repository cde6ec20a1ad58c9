use super::{friendly_error, Context};

/// Run the `send` subcommand.
///
/// The task is opened first so a queued reply lands in its input queue.
pub async fn run(ctx: &Context, task_id: &str, message: &str, web_search: bool) -> anyhow::Result<()> {
    ctx.session
        .open_task(task_id)
        .await
        .map_err(friendly_error)?;
    let response = ctx
        .session
        .send_message(task_id, message, web_search)
        .await
        .map_err(friendly_error)?;

    if response.queued {
        println!("queued {} (task is busy)", response.id);
    } else {
        println!("sent {}", response.id);
    }
    Ok(())
}
