//! # Relay Server
//!
//! Accepts TCP connections, applies the whitelist and runs one reader and one writer task per
//! admitted connection. Decoded messages are forwarded to the single routing task
//! ([`Hub`](crate::transport::hub::Hub)).
//!
//! ## Responsibilities
//! - Silently drop peers the whitelist does not admit (nothing is ever written to them)
//! - Frame and decode inbound bytes; drop bad frames without closing the connection
//! - Treat read errors like a close, so cleanup runs exactly once per client
//! - Graceful shutdown on Ctrl+C or an external shutdown channel

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec::FrameCodec;
use crate::core::message::Message;
use crate::error::{RelayError, Result};
use crate::protocol::registry::ClientId;
use crate::transport::hub::{Hub, HubHandle};
use crate::transport::whitelist::Whitelist;
use crate::utils::metrics::Metrics;

/// Interval at which shutdown polls for remaining connections
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whitelist-gated relay server.
pub struct RelayServer {
    config: ServerConfig,
    whitelist: Arc<Whitelist>,
    metrics: Arc<Metrics>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, whitelist: Whitelist) -> Self {
        Self {
            config,
            whitelist: Arc::new(whitelist),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Shared metrics handle, valid after the server has stopped.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.address).await?;
        info!(address = %listener.local_addr()?, "Relay server ready");
        Ok(listener)
    }

    /// Serve until Ctrl+C or SIGTERM.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Received shutdown signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        });

        self.serve_with_shutdown(listener, shutdown_rx).await
    }

    /// Serve until a message arrives on `shutdown_rx` (or its sender is dropped).
    #[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let (hub, handle) = Hub::new(self.metrics.clone());
        let hub_task = tokio::spawn(hub.run());
        let (closing_tx, closing_rx) = watch::channel(false);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Closing connections...");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.admit(stream, peer, &handle, &closing_rx),
                        Err(e) => {
                            self.metrics.transport_error();
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        drop(listener);
        let _ = closing_tx.send(true);
        drop(handle);

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while self.metrics.active_connections() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All connections closed"),
            Err(_) => warn!(
                remaining = self.metrics.active_connections(),
                "Shutdown timeout reached, forcing exit"
            ),
        }

        if drained.is_ok() {
            if let Err(e) = hub_task.await {
                error!(error = %e, "Routing task panicked");
            }
        } else {
            hub_task.abort();
        }

        self.metrics.log_metrics();
        Ok(())
    }

    fn admit(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        hub: &HubHandle,
        closing: &watch::Receiver<bool>,
    ) {
        if !self.whitelist.permits(&peer) {
            self.metrics.connection_rejected();
            warn!(
                ip = %peer.ip(),
                port = peer.port(),
                error = %RelayError::ConnectionRejected(peer),
                "Socket origin is not whitelisted, rejecting"
            );
            // Dropping the stream closes it without writing anything
            drop(stream);
            return;
        }

        self.metrics.connection_established();
        let connection = Connection {
            peer,
            hub: hub.clone(),
            closing: closing.clone(),
            metrics: self.metrics.clone(),
        };

        tokio::spawn(async move {
            let metrics = connection.metrics.clone();
            connection.run(stream).await;
            metrics.connection_closed();
        });
    }
}

/// Per-connection state owned by the reader task.
struct Connection {
    peer: SocketAddr,
    hub: HubHandle,
    closing: watch::Receiver<bool>,
    metrics: Arc<Metrics>,
}

impl Connection {
    #[instrument(skip_all, fields(peer = %self.peer))]
    async fn run(mut self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_frames(
            write_half,
            outbound_rx,
            self.peer,
            self.metrics.clone(),
        ));

        let client = match self.hub.register(self.peer, outbound).await {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "Could not register connection");
                return;
            }
        };

        let mut frames = FramedRead::new(read_half, FrameCodec::new());

        loop {
            tokio::select! {
                next = frames.next() => match next {
                    Some(Ok(frame)) => self.on_frame(client, &frame),
                    Some(Err(e)) => {
                        self.metrics.transport_error();
                        error!(client = %client, error = %e, "Socket read failed");
                        break;
                    }
                    None => {
                        debug!(client = %client, "Peer closed connection");
                        break;
                    }
                },

                _ = self.closing.changed() => break,
            }
        }

        if let Err(e) = self.hub.disconnect(client) {
            debug!(client = %client, error = %e, "Routing task gone before disconnect");
        }

        // The writer stops once the hub has released the client's outbound sender
        if let Err(e) = writer.await {
            error!(client = %client, error = %e, "Writer task panicked");
        }
    }

    fn on_frame(&self, client: ClientId, frame: &str) {
        self.metrics.frame_received();
        debug!(client = %client, msg = %frame, "Received frame");

        match Message::decode(frame) {
            Ok(message) => {
                if let Err(e) = self.hub.inbound(client, message) {
                    debug!(client = %client, error = %e, "Routing task gone, frame discarded");
                }
            }
            Err(e) => {
                self.metrics.frame_dropped();
                warn!(client = %client, error = %e, "Failed to handle message");
            }
        }
    }
}

async fn write_frames(
    write_half: OwnedWriteHalf,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    peer: SocketAddr,
    metrics: Arc<Metrics>,
) {
    let mut sink = FramedWrite::new(write_half, FrameCodec::new());
    let mut frames = UnboundedReceiverStream::new(outbound).map(Ok::<Bytes, RelayError>);

    if let Err(e) = sink.send_all(&mut frames).await {
        metrics.transport_error();
        warn!(peer = %peer, error = %e, "Failed to write to client");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::transport::whitelist::WhitelistEntry;
    use tokio::io::AsyncReadExt;

    const PUBLIC_PEER: &str = "8.8.8.8:27015";

    /// Accept one real loopback connection, returning both ends.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        (client, server_side)
    }

    #[tokio::test]
    async fn unlisted_public_peer_is_closed_without_a_byte() {
        let server = RelayServer::new(ServerConfig::default(), Whitelist::default());
        let (mut hub, handle) = Hub::new(server.metrics());
        let (_closing_tx, closing_rx) = watch::channel(false);

        let (mut client, stream) = socket_pair().await;
        server.admit(stream, PUBLIC_PEER.parse().unwrap(), &handle, &closing_rx);

        let mut received = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .expect("rejected socket was left open");
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(received.is_empty());

        hub.process_pending();
        assert_eq!(hub.registered(), 0);

        let snapshot = server.metrics().snapshot();
        assert_eq!(snapshot.connections_rejected, 1);
        assert_eq!(snapshot.connections_total, 0);
        assert_eq!(snapshot.connections_active, 0);
    }

    #[tokio::test]
    async fn listed_public_peer_gets_an_identity() {
        let peer: SocketAddr = PUBLIC_PEER.parse().unwrap();
        let whitelist = Whitelist::new(vec![WhitelistEntry::new(peer.ip(), peer.port())]);
        let server = RelayServer::new(ServerConfig::default(), whitelist);
        let (mut hub, handle) = Hub::new(server.metrics());
        let (_closing_tx, closing_rx) = watch::channel(false);

        let (_client, stream) = socket_pair().await;
        server.admit(stream, peer, &handle, &closing_rx);

        for _ in 0..250 {
            hub.process_pending();
            if hub.registered() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(hub.registered(), 1);

        let snapshot = server.metrics().snapshot();
        assert_eq!(snapshot.connections_rejected, 0);
        assert_eq!(snapshot.connections_total, 1);
    }
}
