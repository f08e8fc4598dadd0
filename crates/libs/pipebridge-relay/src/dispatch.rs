//! Topic-based routing of inbound envelopes.
//!
//! One dispatcher serves one session. Messages are processed strictly in
//! arrival order; exactly one handler runs per message. Inbound envelopes
//! are filtered before routing: undecodable, payload-less, self-originated
//! and foreign-session messages are dropped without error.

use std::collections::HashMap;

use async_trait::async_trait;
use pipebridge_proto::{Envelope, SESSION_ID_FIELD};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::error::RelayError;

/// Local identity for one relay session: the session id scoping accepted
/// messages and the fixed source label stamped on outbound envelopes.
///
/// Passed explicitly into every handler — there is no global session state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub source: String,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), source: source.into() }
    }

    /// Build an outbound envelope, stamping the session id into the payload.
    pub fn envelope(
        &self,
        topic: impl Into<String>,
        mut data: Map<String, Value>,
        in_reply_to_event: Option<String>,
    ) -> Envelope {
        data.insert(SESSION_ID_FIELD.to_string(), Value::String(self.session_id.clone()));
        let mut event = Envelope::new(topic, data, self.source.clone());
        event.in_reply_to_event = in_reply_to_event;
        event
    }

    /// Whether an inbound envelope passes the drop filters.
    pub fn accepts(&self, event: &Envelope) -> bool {
        if event.data.is_empty() || event.source.is_empty() {
            log::debug!("dispatch: dropping envelope without payload or source");
            return false;
        }
        if event.source == self.source {
            log::debug!("dispatch: dropping self-originated {} envelope", event.topic);
            return false;
        }
        match event.session_id() {
            Some(id) if id == self.session_id => true,
            _ => {
                // Cross-talk from an unrelated session sharing the channel;
                // dropped silently per protocol.
                log::debug!("dispatch: dropping {} envelope for another session", event.topic);
                false
            }
        }
    }
}

/// A message produced by a handler, to be enveloped and written back by the
/// transport.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub topic: String,
    pub data: Map<String, Value>,
    pub in_reply_to_event: Option<String>,
}

impl Outbound {
    /// An unsolicited message.
    pub fn message(topic: impl Into<String>, data: Map<String, Value>) -> Self {
        Self { topic: topic.into(), data, in_reply_to_event: None }
    }

    /// A reply on the triggering envelope's topic, correlated to its id.
    pub fn reply(event: &Envelope, data: Map<String, Value>) -> Self {
        Self {
            topic: event.topic.clone(),
            data,
            in_reply_to_event: Some(event.id.clone()),
        }
    }
}

/// A registered topic handler.
///
/// Handlers run sequentially on the dispatch task and may return outbound
/// messages, which the transport sends before the next inbound message is
/// processed. A returned error is logged and swallowed; the dispatch loop
/// never crashes on a handler failure.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &mut self,
        event: &Envelope,
        ctx: &SessionContext,
    ) -> Result<Vec<Outbound>, RelayError>;
}

/// Pending request/reply correlations.
///
/// Correlation is advisory: an inbound envelope whose `in_reply_to_event`
/// matches a pending id is handed to the waiter instead of topic routing,
/// but an unmatched correlation value routes by topic as normal. Replayed
/// replies are not deduplicated.
#[derive(Default)]
struct ReplyRouter {
    pending: HashMap<String, oneshot::Sender<Envelope>>,
}

impl ReplyRouter {
    fn expect(&mut self, event_id: &str) -> oneshot::Receiver<Envelope> {
        // A caller that gave up waiting dropped its receiver; reclaim those
        // entries here so a silent peer cannot grow the map without bound.
        self.pending.retain(|_, tx| !tx.is_closed());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(event_id.to_string(), tx);
        rx
    }

    /// Hand *event* to a waiter if one matches; otherwise give it back for
    /// topic routing.
    fn deliver(&mut self, event: Envelope) -> Option<Envelope> {
        let Some(reply_to) = event.in_reply_to_event.as_deref() else {
            return Some(event);
        };
        match self.pending.remove(reply_to) {
            Some(waiter) => {
                // A dropped receiver means the requester gave up waiting;
                // the reply is discarded either way.
                let _ = waiter.send(event);
                None
            }
            None => Some(event),
        }
    }
}

/// Routes inbound envelopes to registered handlers.
pub struct Dispatcher {
    ctx: SessionContext,
    handlers: HashMap<String, Box<dyn EventHandler>>,
    fallback: Option<Box<dyn EventHandler>>,
    replies: ReplyRouter,
}

impl Dispatcher {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx, handlers: HashMap::new(), fallback: None, replies: ReplyRouter::default() }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Register *handler* for *topic*. Re-registering replaces the previous
    /// handler — there is no fan-out to multiple subscribers.
    pub fn register(&mut self, topic: impl Into<String>, handler: Box<dyn EventHandler>) {
        self.handlers.insert(topic.into(), handler);
    }

    /// Install the hook receiving envelopes whose topic has no registered
    /// handler. Host-owned extensions customize behavior here.
    pub fn set_fallback(&mut self, handler: Box<dyn EventHandler>) {
        self.fallback = Some(handler);
    }

    /// Register interest in the reply to an already-sent envelope id.
    pub fn expect_reply(&mut self, event_id: &str) -> oneshot::Receiver<Envelope> {
        self.replies.expect(event_id)
    }

    /// Decode and route one raw message, returning the envelopes to send
    /// back. Undecodable input is logged and dropped.
    pub async fn dispatch(&mut self, raw: &[u8]) -> Vec<Envelope> {
        let event = match Envelope::from_json(raw) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("dispatch: dropping undecodable message: {err}");
                return Vec::new();
            }
        };
        self.dispatch_event(event).await
    }

    /// Route one decoded envelope.
    pub async fn dispatch_event(&mut self, event: Envelope) -> Vec<Envelope> {
        if !self.ctx.accepts(&event) {
            return Vec::new();
        }

        let Some(event) = self.replies.deliver(event) else {
            return Vec::new();
        };

        let handler = match self.handlers.get_mut(&event.topic) {
            Some(handler) => handler,
            None => match self.fallback.as_mut() {
                Some(handler) => handler,
                None => {
                    log::debug!("dispatch: no handler for {}", event.topic);
                    return Vec::new();
                }
            },
        };

        match handler.handle(&event, &self.ctx).await {
            Ok(outbound) => outbound
                .into_iter()
                .map(|out| self.ctx.envelope(out.topic, out.data, out.in_reply_to_event))
                .collect(),
            Err(err) => {
                log::warn!("dispatch: {} handler failed: {err}", event.topic);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recorder {
        hits: Arc<AtomicUsize>,
        reply: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(
            &mut self,
            event: &Envelope,
            _ctx: &SessionContext,
        ) -> Result<Vec<Outbound>, RelayError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.reply {
                Ok(vec![Outbound::reply(event, Map::new())])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(
            &mut self,
            _event: &Envelope,
            _ctx: &SessionContext,
        ) -> Result<Vec<Outbound>, RelayError> {
            Err(RelayError::Internal("boom".into()))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(SessionContext::new("sess-1", "harmony"))
    }

    fn inbound(topic: &str, session_id: &str) -> Envelope {
        let mut data = Map::new();
        data.insert(SESSION_ID_FIELD.to_string(), json!(session_id));
        Envelope::new(topic, data, "standalone")
    }

    #[tokio::test]
    async fn routes_to_registered_handler_and_stamps_replies() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Recorder { hits: hits.clone(), reply: true }));

        let event = inbound("t.a", "sess-1");
        let replies = dispatcher.dispatch_event(event.clone()).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].topic, "t.a");
        assert_eq!(replies[0].in_reply_to_event.as_deref(), Some(event.id.as_str()));
        assert_eq!(replies[0].session_id(), Some("sess-1"));
        assert_eq!(replies[0].source, "harmony");
    }

    #[tokio::test]
    async fn foreign_session_envelope_is_silently_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Recorder { hits: hits.clone(), reply: true }));

        let replies = dispatcher.dispatch_event(inbound("t.a", "other-session")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0, "handler must not run");
        assert!(replies.is_empty(), "no reply may be sent");
    }

    #[tokio::test]
    async fn self_originated_envelope_is_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Recorder { hits: hits.clone(), reply: false }));

        let mut event = inbound("t.a", "sess-1");
        event.source = "harmony".to_string();
        let replies = dispatcher.dispatch_event(event).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn payload_less_envelope_is_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Recorder { hits: hits.clone(), reply: false }));

        let event = Envelope::new("t.a", Map::new(), "standalone");
        dispatcher.dispatch_event(event).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unmatched_topic_falls_through_to_the_fallback_hook() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.set_fallback(Box::new(Recorder { hits: hits.clone(), reply: false }));

        dispatcher.dispatch_event(inbound("t.unknown", "sess-1")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn matched_correlation_goes_to_the_waiter_not_the_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Recorder { hits: hits.clone(), reply: false }));

        let request = dispatcher.context().envelope("t.a", Map::new(), None);
        let mut waiter = dispatcher.expect_reply(&request.id);

        let mut reply = inbound("t.a", "sess-1");
        reply.in_reply_to_event = Some(request.id.clone());
        dispatcher.dispatch_event(reply).await;

        let delivered = waiter.try_recv().expect("waiter must receive the reply");
        assert_eq!(delivered.in_reply_to_event.as_deref(), Some(request.id.as_str()));
        assert_eq!(hits.load(Ordering::SeqCst), 0, "topic handler bypassed");
    }

    #[test]
    fn abandoned_waiters_are_reclaimed() {
        let mut dispatcher = dispatcher();

        let waiter = dispatcher.expect_reply("req-1");
        drop(waiter);

        // Registering the next expectation prunes the dead entry.
        let _live = dispatcher.expect_reply("req-2");
        assert_eq!(dispatcher.replies.pending.len(), 1);
        assert!(dispatcher.replies.pending.contains_key("req-2"));
    }

    #[tokio::test]
    async fn replayed_reply_routes_by_topic_without_dedup() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Recorder { hits: hits.clone(), reply: false }));

        let request = dispatcher.context().envelope("t.a", Map::new(), None);
        let mut waiter = dispatcher.expect_reply(&request.id);

        let mut reply = inbound("t.a", "sess-1");
        reply.in_reply_to_event = Some(request.id.clone());
        dispatcher.dispatch_event(reply.clone()).await;
        waiter.try_recv().expect("first delivery goes to the waiter");

        // The waiter is spent, so the replay is an ordinary message: it is
        // processed again through topic routing, never deduplicated.
        dispatcher.dispatch_event(reply).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_correlation_routes_by_topic() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Recorder { hits: hits.clone(), reply: false }));

        let mut event = inbound("t.a", "sess-1");
        event.in_reply_to_event = Some("never-sent".to_string());
        dispatcher.dispatch_event(event).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_are_swallowed() {
        let mut dispatcher = dispatcher();
        dispatcher.register("t.a", Box::new(Failing));

        let replies = dispatcher.dispatch_event(inbound("t.a", "sess-1")).await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn undecodable_raw_message_is_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        dispatcher.set_fallback(Box::new(Recorder { hits: hits.clone(), reply: false }));

        let replies = dispatcher.dispatch(b"\xff not json").await;
        assert!(replies.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
