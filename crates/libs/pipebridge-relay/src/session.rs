//! Session lifecycle and handshake state machine.
//!
//! One session pairs this relay with one external pipeline process for the
//! lifetime of the host application. Transitions are driven by fixed topic
//! constants: the relay announces itself on the discover topic after a
//! settle delay, the first context-data message from the matching session
//! connects it, and shutdown sends a best-effort notification.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipebridge_proto::topics::{
    ALIVE_TOPIC, CONTEXT_DATA_TOPIC, DISCOVER_TOPIC, PING_TOPIC, RPC_TOPIC, SHUTDOWN_TOPIC,
};
use pipebridge_proto::Envelope;
use serde_json::{Map, Value};

use crate::config::RelayConfig;
use crate::dispatch::{Dispatcher, EventHandler, Outbound, SessionContext};
use crate::error::RelayError;
use crate::launcher::{Launcher, LauncherRegistry};
use crate::rpc::RpcBridge;

/// Handshake states, in order of normal progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Initial; transport not yet started.
    Disconnected,
    /// Transport started, discovery sent, waiting for the peer's first
    /// context-data or ack.
    AwaitingPeerAlive,
    /// Peer confirmed with a matching session id; launchers are live.
    Connected,
    /// Host application is closing.
    ShuttingDown,
}

#[derive(Debug)]
struct Shared {
    state: RelayState,
    launchers: LauncherRegistry,
}

/// One logical pairing with the external pipeline process.
///
/// Owns the handshake state and the launcher registry; clones share both,
/// so the transport loop and host-side callers observe the same session.
#[derive(Clone)]
pub struct Session {
    config: RelayConfig,
    ctx: SessionContext,
    shared: Arc<Mutex<Shared>>,
}

impl Session {
    /// Create a session for the given *source* label (e.g. `"harmony"`).
    pub fn new(config: RelayConfig, source: impl Into<String>) -> Self {
        let ctx = SessionContext::new(config.session_id.clone(), source);
        Self {
            config,
            ctx,
            shared: Arc::new(Mutex::new(Shared {
                state: RelayState::Disconnected,
                launchers: LauncherRegistry::default(),
            })),
        }
    }

    /// Create a session configured from the process environment.
    pub fn from_env(source: impl Into<String>) -> Result<Self, RelayError> {
        Ok(Self::new(RelayConfig::from_env()?, source))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn state(&self) -> RelayState {
        self.shared.lock().expect("session state mutex poisoned").state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == RelayState::Connected
    }

    /// Mark the transport as started; the relay now waits for the peer.
    pub fn begin(&self) {
        let mut shared = self.shared.lock().expect("session state mutex poisoned");
        if shared.state == RelayState::Disconnected {
            shared.state = RelayState::AwaitingPeerAlive;
            log::info!("session: awaiting peer for session {}", self.ctx.session_id);
        }
    }

    /// The discovery message announcing this relay and its host version.
    pub fn discovery(&self, host_version: &str) -> Outbound {
        let mut data = Map::new();
        data.insert("version".to_string(), Value::String(host_version.to_string()));
        Outbound::message(DISCOVER_TOPIC, data)
    }

    /// Best-effort shutdown notification; not acknowledged.
    pub fn shutdown_notice(&self) -> Outbound {
        Outbound::message(SHUTDOWN_TOPIC, Map::new())
    }

    pub fn mark_shutdown(&self) {
        let mut shared = self.shared.lock().expect("session state mutex poisoned");
        shared.state = RelayState::ShuttingDown;
        log::info!("session: shutting down");
    }

    /// Snapshot of the current launcher registry.
    pub fn launchers(&self) -> Vec<Launcher> {
        self.shared
            .lock()
            .expect("session state mutex poisoned")
            .launchers
            .iter()
            .cloned()
            .collect()
    }

    /// Build the run-dialog message for the named tool, if registered.
    pub fn launch_tool(&self, name: &str) -> Option<Outbound> {
        self.shared
            .lock()
            .expect("session state mutex poisoned")
            .launchers
            .launch_tool(name)
    }

    /// Handler for context-data messages; shares this session's state.
    pub fn context_handler(&self) -> ContextDataHandler {
        ContextDataHandler { shared: self.shared.clone() }
    }

    /// Handler for the peer's alive announcements; shares this session's
    /// state.
    pub fn alive_handler(&self) -> AliveHandler {
        AliveHandler { shared: self.shared.clone() }
    }
}

/// Applies context-data messages: rebuilds the launcher registry, performs
/// the connect transition, and acknowledges with an empty reply.
pub struct ContextDataHandler {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl EventHandler for ContextDataHandler {
    async fn handle(
        &mut self,
        event: &Envelope,
        _ctx: &SessionContext,
    ) -> Result<Vec<Outbound>, RelayError> {
        {
            let mut shared = self.shared.lock().expect("session state mutex poisoned");

            match event.data.get("panel_launchers") {
                Some(value) => match serde_json::from_value::<Vec<Launcher>>(value.clone()) {
                    Ok(launchers) => shared.launchers.replace_all(launchers),
                    Err(err) => log::warn!("session: malformed panel_launchers: {err}"),
                },
                None => log::debug!("session: context data without launchers"),
            }

            if shared.state != RelayState::Connected
                && shared.state != RelayState::ShuttingDown
            {
                shared.state = RelayState::Connected;
                log::info!("session: peer connected, context data received");
            }
        }
        Ok(vec![Outbound::reply(event, Map::new())])
    }
}

/// Marks the peer connected on its first alive announcement and answers
/// with an empty reply. Context data may still arrive later to fill the
/// launcher registry.
pub struct AliveHandler {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl EventHandler for AliveHandler {
    async fn handle(
        &mut self,
        event: &Envelope,
        _ctx: &SessionContext,
    ) -> Result<Vec<Outbound>, RelayError> {
        {
            let mut shared = self.shared.lock().expect("session state mutex poisoned");
            if shared.state == RelayState::AwaitingPeerAlive {
                shared.state = RelayState::Connected;
                log::info!("session: peer connected, alive received");
            }
        }
        Ok(vec![Outbound::reply(event, Map::new())])
    }
}

/// Answers liveness probes with an empty reply.
pub struct PingHandler;

#[async_trait]
impl EventHandler for PingHandler {
    async fn handle(
        &mut self,
        event: &Envelope,
        _ctx: &SessionContext,
    ) -> Result<Vec<Outbound>, RelayError> {
        Ok(vec![Outbound::reply(event, Map::new())])
    }
}

/// Wire the standard handler set: context-data, liveness and rpc.
/// Host-owned extensions go in through [`Dispatcher::set_fallback`].
pub fn standard_dispatcher(session: &Session, rpc: RpcBridge) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(session.context().clone());
    dispatcher.register(CONTEXT_DATA_TOPIC, Box::new(session.context_handler()));
    dispatcher.register(PING_TOPIC, Box::new(PingHandler));
    dispatcher.register(ALIVE_TOPIC, Box::new(session.alive_handler()));
    dispatcher.register(RPC_TOPIC, Box::new(rpc));
    dispatcher
}
