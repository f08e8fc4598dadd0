//! Single-peer TCP transport with length-prefixed framing.
//!
//! The relay listens on the loopback interface and serves exactly one peer
//! connection at a time. Additional connection attempts while a peer is
//! served are logged and closed immediately. A disconnect returns the
//! server to accepting, with all partial framing state discarded.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pipebridge_proto::topics::DISCOVER_TOPIC;
use pipebridge_proto::{encode_frame, Envelope, FrameReader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, Outbound};
use crate::error::RelayError;
use crate::session::Session;
use crate::transport::RelayHandle;

enum ServeEnd {
    Disconnected,
    Shutdown,
}

/// TCP transport loop for one relay session.
pub struct TcpRelayServer {
    listener: TcpListener,
    session: Session,
    dispatcher: Dispatcher,
    commands: mpsc::UnboundedReceiver<Outbound>,
    handle: RelayHandle,
    connected: Arc<AtomicBool>,
    host_version: String,
}

impl TcpRelayServer {
    /// Bind on `127.0.0.1` at the session's configured port.
    ///
    /// A bind failure (port taken, usually a second host instance) is
    /// returned to the caller; the relay stays disabled but the host keeps
    /// running.
    pub async fn bind(
        session: Session,
        dispatcher: Dispatcher,
        host_version: impl Into<String>,
    ) -> Result<Self, RelayError> {
        let port = session.config().listen_port;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|err| {
            RelayError::Transport(format!("could not bind 127.0.0.1:{port}: {err}"))
        })?;
        log::info!(
            "tcp: listening on {} for session {}",
            listener.local_addr().map_or_else(|_| "127.0.0.1".to_string(), |a| a.to_string()),
            session.context().session_id
        );

        let (tx, commands) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        Ok(Self {
            listener,
            session,
            dispatcher,
            commands,
            handle: RelayHandle::new(connected.clone(), tx),
            connected,
            host_version: host_version.into(),
        })
    }

    /// The bound address; useful when the configured port was `0`.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listener
            .local_addr()
            .map_err(|err| RelayError::Transport(format!("local_addr failed: {err}")))
    }

    /// Handle for queueing outbound messages from the host side.
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Run until *cancel* fires. One peer at a time; a disconnect resets
    /// framing state and resumes accepting.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayError> {
        let TcpRelayServer {
            listener,
            session,
            mut dispatcher,
            mut commands,
            // Held for the loop's lifetime so the command channel never
            // closes and recv() stays pending when idle.
            handle: _handle,
            connected,
            host_version,
        } = self;

        session.begin();
        let settle = tokio::time::sleep(session.config().settle_delay);
        tokio::pin!(settle);
        let mut announced = false;

        loop {
            // Not connected: wait for a peer, drop host-side sends.
            let stream = tokio::select! {
                _ = cancel.cancelled() => {
                    session.mark_shutdown();
                    log::info!("tcp: stopped before a peer connected");
                    return Ok(());
                }
                _ = &mut settle, if !announced => {
                    // The peer reaches us by connecting, so an unconnected
                    // discovery announcement has nowhere to go.
                    announced = true;
                    log::warn!(
                        "tcp: not connected, dropping {DISCOVER_TOPIC} event"
                    );
                    continue;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        log::info!("tcp: peer connected from {addr}");
                        stream
                    }
                    Err(err) => {
                        log::warn!("tcp: accept failed: {err}");
                        continue;
                    }
                },
            };

            connected.store(true, Ordering::SeqCst);
            let end = serve_connection(
                &listener,
                &session,
                &mut dispatcher,
                &mut commands,
                stream,
                &cancel,
                &host_version,
                &mut announced,
            )
            .await;
            connected.store(false, Ordering::SeqCst);

            // Anything still queued was addressed to the peer that just
            // left; a later peer must not receive it.
            while let Ok(out) = commands.try_recv() {
                log::warn!("tcp: peer disconnected, dropping queued {} event", out.topic);
            }

            if matches!(end, ServeEnd::Shutdown) {
                return Ok(());
            }
        }
    }
}

/// Serve one peer connection until it drops or shutdown is requested.
#[allow(clippy::too_many_arguments)]
async fn serve_connection(
    listener: &TcpListener,
    session: &Session,
    dispatcher: &mut Dispatcher,
    commands: &mut mpsc::UnboundedReceiver<Outbound>,
    stream: TcpStream,
    cancel: &CancellationToken,
    host_version: &str,
    announced: &mut bool,
) -> ServeEnd {
    let (mut rd, mut wr) = stream.into_split();
    let mut reader = FrameReader::new();

    if !*announced {
        *announced = true;
        let out = session.discovery(host_version);
        let event = dispatcher.context().envelope(out.topic, out.data, out.in_reply_to_event);
        write_envelope(&mut wr, &event).await;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                session.mark_shutdown();
                let out = session.shutdown_notice();
                let event =
                    dispatcher.context().envelope(out.topic, out.data, out.in_reply_to_event);
                // Best effort; the peer may already be gone.
                write_envelope(&mut wr, &event).await;
                let _ = wr.shutdown().await;
                return ServeEnd::Shutdown;
            }
            extra = listener.accept() => {
                if let Ok((socket, addr)) = extra {
                    log::warn!("tcp: rejecting connection from {addr}, peer slot is taken");
                    drop(socket);
                }
            }
            command = commands.recv() => {
                if let Some(out) = command {
                    let event =
                        dispatcher.context().envelope(out.topic, out.data, out.in_reply_to_event);
                    if !write_envelope(&mut wr, &event).await {
                        reader.reset();
                        return ServeEnd::Disconnected;
                    }
                }
            }
            chunk = read_chunk(&mut rd) => match chunk {
                Ok(chunk) if chunk.is_empty() => {
                    log::info!("tcp: peer disconnected");
                    reader.reset();
                    return ServeEnd::Disconnected;
                }
                Ok(chunk) => {
                    reader.push(&chunk);
                    loop {
                        match reader.next_frame() {
                            Ok(Some(frame)) => {
                                for event in dispatcher.dispatch(&frame).await {
                                    write_envelope(&mut wr, &event).await;
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                log::error!("tcp: dropping connection on framing error: {err}");
                                let _ = wr.shutdown().await;
                                return ServeEnd::Disconnected;
                            }
                        }
                    }
                }
                Err(err) => {
                    log::warn!("tcp: read failed: {err}");
                    reader.reset();
                    return ServeEnd::Disconnected;
                }
            },
        }
    }
}

async fn read_chunk(rd: &mut OwnedReadHalf) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; 8192];
    let n = rd.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

async fn write_envelope(wr: &mut OwnedWriteHalf, event: &Envelope) -> bool {
    let payload = match event.to_json() {
        Ok(payload) => payload,
        Err(err) => {
            log::warn!("tcp: failed to encode {} event: {err}", event.topic);
            return false;
        }
    };
    let framed = match encode_frame(&payload) {
        Ok(framed) => framed,
        Err(err) => {
            log::warn!("tcp: failed to frame {} event: {err}", event.topic);
            return false;
        }
    };
    match wr.write_all(&framed).await {
        Ok(()) => {
            log::debug!("tcp: sent {} event", event.topic);
            true
        }
        Err(err) => {
            log::warn!("tcp: write failed for {} event: {err}", event.topic);
            false
        }
    }
}
