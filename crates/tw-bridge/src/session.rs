//! Request/response flows that feed their results back into the engine.
//!
//! Each operation awaits the daemon first and commits to the store only
//! afterwards, through the engine's inbox, so the commit is ordered with
//! stream frames and re-checked against the current selection.

use tracing::{info, warn};
use tw_api_types::{CreateTaskRequest, PostMessageResponse, QueuedMessage, TaskOverview, TaskStatus};
use tw_core::EngineError;
use tw_core::EngineHandle;

use crate::api_client::{ApiError, DaemonClient};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Clone)]
pub struct Session {
    client: DaemonClient,
    engine: EngineHandle,
}

impl Session {
    pub fn new(client: DaemonClient, engine: EngineHandle) -> Self {
        Self { client, engine }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn client(&self) -> &DaemonClient {
        &self.client
    }

    /// Fetch the task's overview, commit it, then make it the active task.
    /// The task stream is only opened once the fetch has succeeded.
    pub async fn open_task(&self, task_id: &str) -> Result<TaskOverview, SessionError> {
        let task = self.client.get_task(task_id).await?;
        self.engine.commit_task(task.clone()).await?;
        self.engine.select_task(Some(&task.id)).await?;
        Ok(task)
    }

    /// Create a task and switch to it.
    pub async fn create_task(&self, request: &CreateTaskRequest) -> Result<TaskOverview, SessionError> {
        let task = self.client.create_task(request).await?;
        self.engine.commit_task(task.clone()).await?;
        self.engine.select_task(Some(&task.id)).await?;
        info!(task_id = %task.id, "task created and selected");
        Ok(task)
    }

    /// Post a user message. When the daemon queues it, the queue entry is
    /// committed, provided the task is still the active one.
    pub async fn send_message(
        &self,
        task_id: &str,
        content: &str,
        web_search: bool,
    ) -> Result<PostMessageResponse, SessionError> {
        let response = self.client.post_message(task_id, content, web_search).await?;
        if response.queued {
            let message = QueuedMessage {
                id: response.id.clone(),
                content: content.to_string(),
            };
            let applied = self.engine.commit_queued(task_id, message).await?;
            info!(task_id, message_id = %response.id, applied, "message queued");
        }
        Ok(response)
    }

    /// Ask the daemon to stop generating. The task drops back to idle
    /// whether or not the request succeeded.
    pub async fn cancel(&self, task_id: &str) -> Result<(), SessionError> {
        let result = self.client.cancel(task_id).await;
        if let Err(error) = &result {
            warn!(task_id, %error, "cancel request failed");
        }
        self.engine.commit_status(task_id, TaskStatus::Idle).await?;
        Ok(result?)
    }
}
