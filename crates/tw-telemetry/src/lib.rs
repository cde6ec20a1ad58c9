//! Logging and span helpers shared by the taskwatch binaries.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`,
//!   filtered by `RUST_LOG` or a configured default level
//! - **Spans**: per-invocation and per-task spans carrying a correlation id

pub mod logging;
pub mod spans;
