//! Async HTTP client for the daemon's REST endpoints.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tw_api_types::{
    paths, CreateTaskRequest, OutgoingMessage, PostMessageRequest, PostMessageResponse,
    TaskOverview, TaskResponse,
};
use tw_core::config::join_url;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("decode {url}: {message}")]
    Decode { url: String, message: String },
}

/// Reusable client + base URL.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: reqwest::Client,
    base: String,
}

impl DaemonClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base, path)
    }

    /// `GET /v1/task/{id}`
    pub async fn get_task(&self, task_id: &str) -> Result<TaskOverview, ApiError> {
        let url = self.url(&paths::task(task_id));
        let response = self.client.get(&url).send().await?;
        let TaskResponse { task } = decode(&url, response).await?;
        Ok(task)
    }

    /// `POST /v1/task`
    pub async fn create_task(&self, request: &CreateTaskRequest) -> Result<TaskOverview, ApiError> {
        let url = self.url(paths::TASKS);
        let TaskResponse { task } = self.post_json(&url, request).await?;
        debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    /// `POST /v1/task/{id}/message`
    pub async fn post_message(
        &self,
        task_id: &str,
        content: &str,
        web_search: bool,
    ) -> Result<PostMessageResponse, ApiError> {
        let url = self.url(&paths::task_message(task_id));
        let request = PostMessageRequest {
            message: OutgoingMessage::user(content),
            web_search,
        };
        let response: PostMessageResponse = self.post_json(&url, &request).await?;
        debug!(task_id, message_id = %response.id, queued = response.queued, "message posted");
        Ok(response)
    }

    /// `POST /v1/task/{id}/cancel`
    pub async fn cancel(&self, task_id: &str) -> Result<(), ApiError> {
        let url = self.url(&paths::task_cancel(task_id));
        let response = self.client.post(&url).send().await?;
        check(&url, response).await?;
        Ok(())
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.client.post(url).json(body).send().await?;
        decode(url, response).await
    }
}

async fn check(url: &str, response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T, ApiError> {
    let text = check(url, response).await?.text().await?;
    serde_json::from_str(&text).map_err(|e| ApiError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
