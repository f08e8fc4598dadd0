//! Transports carrying envelopes between the relay and its peer process.
//!
//! Both variants share one contract: `send` returns `false` and logs when
//! no peer is reachable — it never raises — and every inbound message goes
//! through the same [`Dispatcher`](crate::Dispatcher) filters and routing.

pub mod hub;
pub mod tcp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dispatch::Outbound;

/// Cheap handle for host-side callers (menus, UI) to queue outbound
/// messages onto the transport loop.
#[derive(Clone)]
pub struct RelayHandle {
    connected: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl RelayHandle {
    fn new(connected: Arc<AtomicBool>, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { connected, tx }
    }

    /// Queue *out* for sending. Returns `false` (with a warning) when no
    /// peer is connected or the transport loop is gone.
    pub fn send(&self, out: Outbound) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            log::warn!("transport: not connected, dropping {} event", out.topic);
            return false;
        }
        match self.tx.send(out) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("transport: relay loop stopped, dropping {} event", err.0.topic);
                false
            }
        }
    }
}
