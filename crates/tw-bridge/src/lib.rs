//! Network layer connecting the taskwatch core to a running daemon.
//!
//! - [`sse`]: incremental `text/event-stream` parser
//! - [`http_transport`]: reqwest-backed [`EventTransport`] with reconnect
//! - [`api_client`]: REST client for the mutating endpoints
//! - [`session`]: ties request/response flows back into the engine
//!
//! [`EventTransport`]: tw_core::transport::EventTransport

pub mod api_client;
pub mod http_transport;
pub mod session;
pub mod sse;

pub use api_client::{ApiError, DaemonClient};
pub use http_transport::{Backoff, HttpEventTransport};
pub use session::{Session, SessionError};
