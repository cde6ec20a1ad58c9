use tw_api_types::CreateTaskRequest;

use super::{friendly_error, watch, Context};

/// Run the `new` subcommand.
pub async fn run(
    ctx: &Context,
    message: String,
    cwd: Option<String>,
    web_search: bool,
    follow: bool,
) -> anyhow::Result<()> {
    let mut request = CreateTaskRequest::new(message);
    request.cwd = cwd;
    request.web_search = web_search;

    let task = ctx
        .session
        .create_task(&request)
        .await
        .map_err(friendly_error)?;
    println!("created {}", task.id);

    if follow {
        watch::run(ctx, &task.id, true).await?;
    }
    Ok(())
}
