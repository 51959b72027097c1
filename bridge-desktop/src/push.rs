//! Socket.IO push transport using tokio-tungstenite
//!
//! [`SocketIoTransport::open`] dials the websocket and returns immediately.
//! A spawned session task then performs the Engine.IO and namespace
//! handshakes and pumps frames between the socket and the [`PushChannel`].
//! Emits issued before the namespace is joined are held until it is.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    push::{
        PushChannel, PushChannelPeer, PushChannelRequest, PushCommand, PushFrame, PushSignal,
        PushTransport,
    },
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::socket_io::{self, EnginePacket, SocketPacket};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Engine.IO defaults (25s ping interval + 20s ping timeout).
const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(45);

/// Desktop [`PushTransport`] speaking Socket.IO over websockets.
#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    handshake_timeout: Duration,
}

impl SocketIoTransport {
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Bound on the time between dialing and the namespace being joined.
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for SocketIoTransport {
    async fn open(&self, request: PushChannelRequest) -> Result<PushChannel> {
        let url = socket_io::websocket_url(&request.url);
        debug!(url = %url, namespace = %request.namespace, "Dialing push channel");

        let (socket, _) = timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| BridgeError::ConnectionFailed(format!("Timed out dialing {}", url)))?
            .map_err(|e| {
                BridgeError::ConnectionFailed(format!("WebSocket connect to {} failed: {}", url, e))
            })?;

        let (channel, peer) = PushChannel::pair();
        let session = Session {
            namespace: request.namespace,
            auth_token: request.auth_token,
            handshake_timeout: self.handshake_timeout,
        };
        tokio::spawn(session.run(socket, peer));

        Ok(channel)
    }
}

struct Session {
    namespace: String,
    auth_token: Option<String>,
    handshake_timeout: Duration,
}

enum Exit {
    /// Local close; no signal owed.
    Local,
    Closed(String),
    ConnectError(String),
}

impl Session {
    async fn run(self, socket: Socket, mut peer: PushChannelPeer) {
        let (mut write, mut read) = socket.split();

        let exit = self.drive(&mut write, &mut read, &mut peer).await;

        match exit {
            Exit::Local => {
                let _ = write
                    .send(Message::Text(socket_io::encode_disconnect(&self.namespace)))
                    .await;
                let _ = write.send(Message::Close(None)).await;
                debug!(namespace = %self.namespace, "Push channel closed locally");
            }
            Exit::Closed(reason) => {
                info!(namespace = %self.namespace, reason = %reason, "Push channel closed");
                let _ = peer.signals.send(PushSignal::Closed { reason });
            }
            Exit::ConnectError(message) => {
                warn!(namespace = %self.namespace, error = %message, "Push channel rejected");
                let _ = peer.signals.send(PushSignal::ConnectError { message });
            }
        }
    }

    async fn drive(
        &self,
        write: &mut futures_util::stream::SplitSink<Socket, Message>,
        read: &mut futures_util::stream::SplitStream<Socket>,
        peer: &mut PushChannelPeer,
    ) -> Exit {
        let handshake_deadline = Instant::now() + self.handshake_timeout;
        let mut liveness = DEFAULT_LIVENESS_WINDOW;
        let mut joined = false;
        let mut deadline = handshake_deadline;
        // Emits issued before the namespace is joined, flushed on join.
        let mut buffered: Vec<PushFrame> = Vec::new();

        loop {
            tokio::select! {
                command = peer.commands.recv() => {
                    match command {
                        Some(PushCommand::Emit(frame)) if !joined => buffered.push(frame),
                        Some(PushCommand::Emit(frame)) => {
                            let text = socket_io::encode_event(&self.namespace, &frame);
                            if let Err(e) = write.send(Message::Text(text)).await {
                                return Exit::Closed(format!("write failed: {}", e));
                            }
                        }
                        Some(PushCommand::Close) | None => return Exit::Local,
                    }
                }

                message = read.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "transport close".to_string());
                            return closed_or_rejected(joined, reason);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return closed_or_rejected(joined, e.to_string()),
                        None => return closed_or_rejected(joined, "transport close".to_string()),
                    };

                    if joined {
                        deadline = Instant::now() + liveness;
                    }

                    let packet = match socket_io::decode(&text) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!(error = %e, "Dropping undecodable push packet");
                            continue;
                        }
                    };

                    match packet {
                        EnginePacket::Open(handshake) => {
                            liveness = handshake.liveness_window();
                            let connect = socket_io::encode_connect(
                                &self.namespace,
                                self.auth_token.as_deref(),
                            );
                            if let Err(e) = write.send(Message::Text(connect)).await {
                                return Exit::ConnectError(format!("namespace connect failed: {}", e));
                            }
                        }
                        EnginePacket::Ping => {
                            if let Err(e) = write.send(Message::Text(socket_io::encode_pong())).await {
                                return Exit::Closed(format!("pong failed: {}", e));
                            }
                        }
                        EnginePacket::Close => {
                            return closed_or_rejected(joined, "server close".to_string());
                        }
                        EnginePacket::Pong | EnginePacket::Noop => {}
                        EnginePacket::Message(packet) if packet.namespace() != self.namespace => {
                            debug!(namespace = %packet.namespace(), "Ignoring packet for other namespace");
                        }
                        EnginePacket::Message(SocketPacket::Connect { .. }) => {
                            joined = true;
                            deadline = Instant::now() + liveness;
                            if peer.signals.send(PushSignal::Open).is_err() {
                                return Exit::Local;
                            }
                            for frame in buffered.drain(..) {
                                let text = socket_io::encode_event(&self.namespace, &frame);
                                if let Err(e) = write.send(Message::Text(text)).await {
                                    return Exit::Closed(format!("write failed: {}", e));
                                }
                            }
                        }
                        EnginePacket::Message(SocketPacket::ConnectError { message, .. }) => {
                            return Exit::ConnectError(message);
                        }
                        EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
                            return Exit::Closed("io server disconnect".to_string());
                        }
                        EnginePacket::Message(SocketPacket::Event { frame, .. }) => {
                            if peer.signals.send(PushSignal::Frame(frame)).is_err() {
                                return Exit::Local;
                            }
                        }
                        EnginePacket::Message(SocketPacket::Unsupported { kind, .. }) => {
                            debug!(kind = %kind, "Ignoring unsupported socket packet");
                        }
                    }
                }

                _ = sleep_until(deadline) => {
                    return if joined {
                        Exit::Closed("ping timeout".to_string())
                    } else {
                        Exit::ConnectError("handshake timed out".to_string())
                    };
                }
            }
        }
    }
}

fn closed_or_rejected(joined: bool, reason: String) -> Exit {
    if joined {
        Exit::Closed(reason)
    } else {
        Exit::ConnectError(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers the first request with a plain 404 instead of an upgrade.
    async fn refusing_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_open_fails_when_upgrade_refused() {
        let transport = SocketIoTransport::new().with_handshake_timeout(Duration::from_secs(2));
        let result = transport
            .open(PushChannelRequest {
                url: refusing_server().await,
                namespace: "/ride-updates".to_string(),
                auth_token: None,
            })
            .await;

        match result {
            Err(BridgeError::ConnectionFailed(message)) => assert!(message.contains("127.0.0.1")),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("channel opened against a refusing server"),
        }
    }
}
