use uuid::Uuid;

/// A fresh correlation id (32 hex characters).
pub fn generate_run_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// Span covering one CLI invocation. Returns the span and its run id so the
/// id can be echoed in error output.
pub fn command_span(command: &str) -> (tracing::Span, String) {
    let run_id = generate_run_id();
    let span = tracing::info_span!("command", run_id = %run_id, command = %command);
    (span, run_id)
}

/// Span for work done on behalf of one task within a run.
pub fn task_span(run_id: &str, task_id: &str) -> tracing::Span {
    tracing::info_span!("task", run_id = %run_id, task_id = %task_id)
}
