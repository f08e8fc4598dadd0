//! DCC-side relay core for the pipebridge integration.
//!
//! A relay is a small in-process component loaded by a content-creation
//! application. It pairs with exactly one external pipeline process over a
//! local channel and exchanges [`pipebridge_proto::Envelope`] messages.
//! This crate provides:
//!
//! - [`Dispatcher`] — topic routing with session filtering and advisory
//!   request/reply correlation
//! - [`RpcBridge`] — allow-listed dispatch of symbolic function names into
//!   the host scripting engine through a [`ScriptBridge`]
//! - [`Session`] — the handshake state machine and launcher registry
//! - [`TcpRelayServer`] — single-peer TCP transport with length-prefixed
//!   framing
//! - [`HubBridge`] — pub/sub transport over an externally supplied
//!   [`HubClient`]
//! - [`RelayConfig`] — typed configuration read from the process
//!   environment in one batch
//!
//! Everything runs on one logical task: messages are dispatched strictly in
//! arrival order and no failure path is allowed to escape the event loop —
//! errors end as a logged warning or an `error_message` reply.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod launcher;
pub mod rpc;
pub mod session;
pub mod transport;

pub use config::RelayConfig;
pub use dispatch::{Dispatcher, EventHandler, Outbound, SessionContext};
pub use error::RelayError;
pub use launcher::{Launcher, LauncherRegistry};
pub use rpc::{RpcBridge, ScriptBridge};
pub use session::{standard_dispatcher, RelayState, Session};
pub use transport::hub::{HubBridge, HubClient};
pub use transport::tcp::TcpRelayServer;
pub use transport::RelayHandle;
