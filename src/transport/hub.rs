//! The routing task.
//!
//! Connection tasks never touch the registry. They talk to one [`Hub`] task over a channel and the
//! hub applies their commands one at a time, which gives:
//! - one frame's handling runs to completion before the next begins
//! - frames from one connection are handled in the order they were framed
//! - no locks around the registry

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::message::Message;
use crate::error::{constants, RelayError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::registry::{ClientId, Outbound};
use crate::utils::metrics::Metrics;

/// Commands accepted by the hub task.
#[derive(Debug)]
pub enum HubCommand {
    /// A connection passed the whitelist and wants an identity
    Register {
        peer: SocketAddr,
        outbound: Outbound,
        reply: oneshot::Sender<ClientId>,
    },
    /// A decoded message from a registered connection
    Inbound { client: ClientId, message: Message },
    /// The connection closed or failed
    Disconnect { client: ClientId },
}

/// Cloneable handle used by connection tasks to reach the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Ask the hub for an identity. Fails once the hub has stopped.
    pub async fn register(&self, peer: SocketAddr, outbound: Outbound) -> Result<ClientId> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Register {
            peer,
            outbound,
            reply,
        })?;
        response
            .await
            .map_err(|_| RelayError::TransportError(constants::ERR_HUB_UNAVAILABLE.to_string()))
    }

    pub fn inbound(&self, client: ClientId, message: Message) -> Result<()> {
        self.send(HubCommand::Inbound { client, message })
    }

    pub fn disconnect(&self, client: ClientId) -> Result<()> {
        self.send(HubCommand::Disconnect { client })
    }

    fn send(&self, command: HubCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| RelayError::TransportError(constants::ERR_HUB_UNAVAILABLE.to_string()))
    }
}

/// Single owner of the client registry.
pub struct Hub {
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    rx: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    /// Create a hub and the handle connection tasks use to reach it.
    pub fn new(metrics: Arc<Metrics>) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            dispatcher: Dispatcher::new(metrics.clone()),
            metrics,
            rx,
        };
        (hub, HubHandle { tx })
    }

    /// Process commands until every handle has been dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        info!(
            remaining = self.dispatcher.registry().len(),
            "Routing task stopped"
        );
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                peer,
                outbound,
                reply,
            } => {
                let id = self.dispatcher.connect(peer, outbound);
                if reply.send(id).is_err() {
                    // Connection task went away before it learned its identity
                    self.dispatcher.disconnect(id);
                }
            }
            HubCommand::Inbound { client, message } => {
                if let Err(e) = self.dispatcher.dispatch(client, &message) {
                    self.metrics.frame_dropped();
                    if e.is_frame_local() {
                        warn!(client = %client, context = %message.context, error = %e, "Dropping frame");
                    } else {
                        debug!(client = %client, error = %e, "Frame from departed client ignored");
                    }
                }
            }
            HubCommand::Disconnect { client } => self.dispatcher.disconnect(client),
        }
    }
}

#[cfg(test)]
impl Hub {
    /// Apply every command already queued, without waiting for more.
    pub(crate) fn process_pending(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            self.handle(command);
        }
    }

    pub(crate) fn registered(&self) -> usize {
        self.dispatcher.registry().len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn register_inbound_disconnect_round() {
        let metrics = Arc::new(Metrics::new());
        let (hub, handle) = Hub::new(metrics.clone());
        let task = tokio::spawn(hub.run());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = handle
            .register(SocketAddr::from(([127, 0, 0, 1], 5000)), tx)
            .await
            .unwrap();
        assert_eq!(id.get(), 1);

        let identify = Message::decode(
            r#"{"context":"Identify","target":"i","data":{"group":"g","ip":"127.0.0.1","name":"A","port":1}}"#,
        )
        .unwrap();
        handle.inbound(id, identify).unwrap();

        let frame = rx.recv().await.unwrap();
        let confirmation: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(confirmation["context"], "Identify");
        assert_eq!(confirmation["data"], 1);

        // Broadcasting alone in the group is fine and delivers nothing
        let chat = Message::decode(r#"{"context":"Chat","target":"g","data":1}"#).unwrap();
        handle.inbound(id, chat).unwrap();

        handle.disconnect(id).unwrap();
        drop(handle);
        task.await.unwrap();

        // Registry dropped the outbound sender
        assert!(rx.recv().await.is_none());
        assert_eq!(metrics.snapshot().frames_dropped, 0);
    }

    #[tokio::test]
    async fn routing_errors_count_as_dropped_frames() {
        let metrics = Arc::new(Metrics::new());
        let (hub, handle) = Hub::new(metrics.clone());
        let task = tokio::spawn(hub.run());

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = handle
            .register(SocketAddr::from(([127, 0, 0, 1], 5001)), tx)
            .await
            .unwrap();

        let chat = Message::decode(r#"{"context":"Chat","target":"b","data":1}"#).unwrap();
        handle.inbound(id, chat).unwrap();
        drop(handle);
        task.await.unwrap();

        assert_eq!(metrics.snapshot().frames_dropped, 1);
    }

    #[tokio::test]
    async fn register_fails_after_hub_stops() {
        let (hub, handle) = Hub::new(Arc::new(Metrics::new()));
        drop(hub);

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = handle
            .register(SocketAddr::from(([127, 0, 0, 1], 5002)), tx)
            .await;
        assert!(matches!(result, Err(RelayError::TransportError(_))));
    }
}
