use super::{friendly_error, Context};

/// Run the `cancel` subcommand.
pub async fn run(ctx: &Context, task_id: &str) -> anyhow::Result<()> {
    ctx.session.cancel(task_id).await.map_err(friendly_error)?;
    println!("cancelled {task_id}");
    Ok(())
}
