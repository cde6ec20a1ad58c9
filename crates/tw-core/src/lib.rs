pub mod config;
pub mod daemon_reconciler;
pub mod decode;
pub mod engine;
pub mod store;
pub mod subscription;
pub mod task_reconciler;
pub mod transport;
pub mod update_bus;

pub use engine::{Engine, EngineError, EngineHandle};
pub use store::{SharedStore, TaskState, TaskStore};
