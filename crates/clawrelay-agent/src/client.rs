//! Agent side of the tunnel: connect, answer requests, reconnect

use clawrelay_proto::{encode, Heartbeat, RelayFrame};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::forwarder::LocalForwarder;
use crate::reconnect::{ReconnectError, ReconnectManager};
use crate::AgentError;

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_QUEUE: usize = 64;

/// How a tunnel session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    Shutdown,
}

pub struct TunnelClient {
    config: AgentConfig,
    forwarder: Arc<LocalForwarder>,
}

impl TunnelClient {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let forwarder = LocalForwarder::new(config.forward_url.clone(), config.local_timeout)?;
        Ok(Self {
            config,
            forwarder: Arc::new(forwarder),
        })
    }

    /// Keep a tunnel open until `shutdown` fires or reconnect attempts run out
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let url = self.config.tunnel_url()?;
        let relay = url.host_str().unwrap_or("relay").to_string();
        let mut reconnect = ReconnectManager::new(self.config.reconnect.clone());

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = connect_async(url.as_str()) => result,
            };

            match attempt {
                Ok((socket, _)) => {
                    info!(relay = %relay, "Tunnel established");
                    reconnect.reset();
                    if self.run_session(socket, &shutdown).await == SessionEnd::Shutdown {
                        info!("Tunnel closed for shutdown");
                        return Ok(());
                    }
                    warn!(relay = %relay, "Tunnel disconnected");
                }
                // The URL carries the token, so only the host is logged
                Err(e) => warn!(relay = %relay, "Tunnel connection failed: {}", e),
            }

            match reconnect.wait(&shutdown).await {
                Ok(()) => info!(attempt = reconnect.attempt(), "Reconnecting"),
                Err(ReconnectError::Cancelled) => return Ok(()),
                Err(e) => {
                    error!("{}", e);
                    return Err(e.into());
                }
            }
        }
    }

    async fn run_session(&self, socket: RelaySocket, shutdown: &CancellationToken) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let session = shutdown.child_token();

        let writer = {
            let session = session.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = session.cancelled() => break,
                        frame = rx.recv() => match frame {
                            Some(text) => {
                                if let Err(e) = sink.send(Message::Text(text)).await {
                                    debug!("Tunnel write failed: {}", e);
                                    session.cancel();
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                let _ = sink.close().await;
            })
        };

        let mut in_flight = JoinSet::new();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        heartbeat.tick().await;

        let end = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                _ = session.cancelled() => break SessionEnd::Disconnected,
                _ = heartbeat.tick() => {
                    if let Ok(ping) = encode(&Heartbeat::Ping) {
                        if tx.send(ping).await.is_err() {
                            break SessionEnd::Disconnected;
                        }
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.dispatch(&text, &tx, &mut in_flight).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Disconnected,
                    // Protocol-level ping/pong is answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Tunnel read failed: {}", e);
                        break SessionEnd::Disconnected;
                    }
                },
            }
        };

        session.cancel();
        in_flight.abort_all();
        let _ = writer.await;
        end
    }

    async fn dispatch(
        &self,
        text: &str,
        tx: &mpsc::Sender<String>,
        in_flight: &mut JoinSet<()>,
    ) {
        match RelayFrame::decode(text) {
            Ok(RelayFrame::Request(request)) => {
                let forwarder = self.forwarder.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let request_id = request.id.clone();
                    let reply = forwarder.handle(request).await;
                    match encode(&reply) {
                        Ok(text) => {
                            if tx.send(text).await.is_err() {
                                debug!(request_id = %request_id, "Tunnel gone before reply was sent");
                            }
                        }
                        Err(e) => warn!(request_id = %request_id, "Failed to encode reply: {}", e),
                    }
                });
            }
            Ok(RelayFrame::Heartbeat(Heartbeat::Ping)) => {
                if let Ok(pong) = encode(&Heartbeat::Pong) {
                    let _ = tx.send(pong).await;
                }
            }
            Ok(RelayFrame::Heartbeat(Heartbeat::Pong)) => debug!("Heartbeat acknowledged"),
            Err(e) => warn!("Dropping malformed frame from relay: {}", e),
        }
    }
}
