//! Pub/sub transport over an externally supplied hub connection.
//!
//! Hosts that already own a connection to the pipeline event hub (e.g.
//! through an embedded client library) bridge it here instead of opening a
//! TCP socket: decoded inbound envelopes are fed into the bridge through a
//! channel, outbound envelopes go back out through the [`HubClient`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pipebridge_proto::topics::{
    ALIVE_TOPIC, CONTEXT_DATA_TOPIC, PING_TOPIC, RPC_TOPIC, SHUTDOWN_TOPIC,
};
use pipebridge_proto::Envelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, Outbound};
use crate::error::RelayError;
use crate::session::Session;
use crate::transport::RelayHandle;

/// Host-owned publisher onto the pipeline event hub.
///
/// The hub fans messages out to every subscriber including the publisher,
/// which is why the dispatcher drops self-originated envelopes by source.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn publish(&self, event: &Envelope) -> Result<(), RelayError>;
}

/// Transport loop bridging one relay session onto a hub connection.
pub struct HubBridge {
    client: Arc<dyn HubClient>,
    session: Session,
    dispatcher: Dispatcher,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    commands: mpsc::UnboundedReceiver<Outbound>,
    handle: RelayHandle,
    connected: Arc<AtomicBool>,
    host_version: String,
}

impl HubBridge {
    /// Build a bridge; the returned sender is where the host feeds envelopes
    /// it received on the subscribed topics.
    pub fn new(
        client: Arc<dyn HubClient>,
        session: Session,
        dispatcher: Dispatcher,
        host_version: impl Into<String>,
    ) -> (Self, mpsc::UnboundedSender<Envelope>) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (tx, commands) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let bridge = Self {
            client,
            session,
            dispatcher,
            inbound,
            commands,
            handle: RelayHandle::new(connected.clone(), tx),
            connected,
            host_version: host_version.into(),
        };
        (bridge, inbound_tx)
    }

    /// The topics the host must subscribe to on the relay's behalf.
    pub fn subscriptions() -> Vec<String> {
        [CONTEXT_DATA_TOPIC, RPC_TOPIC, PING_TOPIC, ALIVE_TOPIC, SHUTDOWN_TOPIC]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Handle for queueing outbound messages from the host side.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Run until *cancel* fires or the host drops the inbound sender.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayError> {
        let HubBridge {
            client,
            session,
            mut dispatcher,
            mut inbound,
            mut commands,
            // Held for the loop's lifetime so the command channel never
            // closes and recv() stays pending when idle.
            handle: _handle,
            connected,
            host_version,
        } = self;

        session.begin();
        // The hub connection already exists, so sends can start immediately.
        connected.store(true, Ordering::SeqCst);

        let settle = tokio::time::sleep(session.config().settle_delay);
        tokio::pin!(settle);
        let mut announced = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    session.mark_shutdown();
                    publish(&*client, &dispatcher, session.shutdown_notice()).await;
                    break;
                }
                _ = &mut settle, if !announced => {
                    announced = true;
                    publish(&*client, &dispatcher, session.discovery(&host_version)).await;
                }
                event = inbound.recv() => match event {
                    Some(event) => {
                        for reply in dispatcher.dispatch_event(event).await {
                            if let Err(err) = client.publish(&reply).await {
                                log::warn!(
                                    "hub: publish failed for {} event: {err}",
                                    reply.topic
                                );
                            }
                        }
                    }
                    None => {
                        log::info!("hub: inbound feed closed, stopping");
                        break;
                    }
                },
                command = commands.recv() => {
                    if let Some(out) = command {
                        publish(&*client, &dispatcher, out).await;
                    }
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Envelope and publish one outbound message, logging failures.
async fn publish(client: &dyn HubClient, dispatcher: &Dispatcher, out: Outbound) -> bool {
    let event = dispatcher.context().envelope(out.topic, out.data, out.in_reply_to_event);
    match client.publish(&event).await {
        Ok(()) => {
            log::debug!("hub: published {} event", event.topic);
            true
        }
        Err(err) => {
            log::warn!("hub: publish failed for {} event: {err}", event.topic);
            false
        }
    }
}
