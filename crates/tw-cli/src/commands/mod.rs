pub mod cancel;
pub mod new;
pub mod send;
pub mod tasks;
pub mod watch;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tw_bridge::{ApiError, Backoff, DaemonClient, HttpEventTransport, Session, SessionError};
use tw_core::config::Config;
use tw_core::{Engine, EngineError, EngineHandle};

/// A running engine plus the session that talks to the daemon.
pub struct Context {
    pub session: Session,
    pub engine: EngineHandle,
    pub run_id: String,
    engine_task: JoinHandle<Result<(), EngineError>>,
}

impl Context {
    pub fn start(config: &Config, run_id: String) -> Self {
        let transport = HttpEventTransport::new(Backoff::from_config(&config.stream));
        let engine = Engine::new(config.daemon.base_url.clone(), Arc::new(transport));
        let handle = engine.handle();
        let engine_task = tokio::spawn(engine.run());

        let session = Session::new(DaemonClient::new(config.daemon.base_url.clone()), handle.clone());
        Self {
            session,
            engine: handle,
            run_id,
            engine_task,
        }
    }

    pub async fn shutdown(self) {
        self.engine.shutdown();
        match self.engine_task.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(%error, "engine stopped with an error"),
            Err(error) => tracing::warn!(%error, "engine task failed"),
        }
    }
}

/// Map session errors to user-friendly messages.
pub fn friendly_error(err: SessionError) -> anyhow::Error {
    match err {
        SessionError::Api(ApiError::Http(err)) if err.is_connect() => anyhow::anyhow!(
            "Could not connect to the daemon. Is it running?\n  \
             (hint: check --url, TASKWATCH_URL or daemon.base_url in the config)"
        ),
        SessionError::Api(ApiError::Http(err)) if err.is_timeout() => {
            anyhow::anyhow!("Request timed out. The daemon may be overloaded.")
        }
        SessionError::Api(ApiError::Status { status: 404, .. }) => {
            anyhow::anyhow!("No such task.")
        }
        other => anyhow::anyhow!("Request failed: {other}"),
    }
}
