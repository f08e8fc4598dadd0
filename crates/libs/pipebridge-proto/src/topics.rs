//! Fixed topic constants.
//!
//! Topics are dot-namespaced under [`TOPIC_BASE`]; the hub-bridge transport
//! subscribes to the base namespace plus dot-separated suffixes, the TCP
//! transport matches on the full strings. Handshake transitions are keyed
//! on these constants, never on payload inspection.

/// Base namespace for every relay topic.
pub const TOPIC_BASE: &str = "pipebridge.remote";

/// Sent by the relay after the settle delay to discover the peer process.
pub const DISCOVER_TOPIC: &str = "pipebridge.remote.discover";

/// Sent by the peer process with context data and the launcher registry;
/// acknowledged with an empty reply.
pub const CONTEXT_DATA_TOPIC: &str = "pipebridge.remote.context.data";

/// Sent by the relay to ask the peer process to open a tool dialog.
pub const RUN_DIALOG_TOPIC: &str = "pipebridge.remote.run.dialog";

/// Remote procedure call into the relay's host scripting environment.
pub const RPC_TOPIC: &str = "pipebridge.remote.rpc";

/// Liveness probe answered with an empty reply.
pub const ALIVE_TOPIC: &str = "pipebridge.remote.alive";

pub const PING_TOPIC: &str = "pipebridge.remote.ping";

pub const ACK_TOPIC: &str = "pipebridge.remote.ack";

/// Render request/completion pair, handled by host-owned extensions.
pub const RENDER_DO_TOPIC: &str = "pipebridge.remote.render.do";

pub const RENDER_FINISHED_TOPIC: &str = "pipebridge.remote.render.finished";

/// Best-effort notification that the host application is closing.
pub const SHUTDOWN_TOPIC: &str = "pipebridge.remote.shutdown";

/// Join a suffix onto the base namespace, for hub subscription patterns.
pub fn scoped(suffix: &str) -> String {
    format!("{TOPIC_BASE}.{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_topics_live_under_the_base_namespace() {
        let topics = [
            DISCOVER_TOPIC,
            CONTEXT_DATA_TOPIC,
            RUN_DIALOG_TOPIC,
            RPC_TOPIC,
            ALIVE_TOPIC,
            PING_TOPIC,
            ACK_TOPIC,
            RENDER_DO_TOPIC,
            RENDER_FINISHED_TOPIC,
            SHUTDOWN_TOPIC,
        ];
        for topic in topics {
            assert!(topic.starts_with(TOPIC_BASE), "{topic} escapes the namespace");
        }
    }

    #[test]
    fn scoped_joins_with_a_dot() {
        assert_eq!(scoped("context.data"), CONTEXT_DATA_TOPIC);
        assert_eq!(scoped("rpc"), RPC_TOPIC);
    }
}
