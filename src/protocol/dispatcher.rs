use crate::core::message::{contexts, Message, Target};
use crate::error::Result;
use crate::protocol::handshake;
use crate::protocol::registry::{ClientId, ClientRegistry, Outbound};
use crate::protocol::router;
use crate::utils::metrics::Metrics;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Routes decoded messages by target and owns the client lifecycle.
///
/// Control frames (`"i"`) go to the identify handshake; everything else goes to the router.
/// All methods run to completion synchronously, so one frame is fully handled before the next.
pub struct Dispatcher {
    registry: ClientRegistry,
    metrics: Arc<Metrics>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Arc::new(Metrics::new()))
    }
}

impl Dispatcher {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            registry: ClientRegistry::new(),
            metrics,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Register a freshly admitted connection.
    pub fn connect(&mut self, peer: SocketAddr, outbound: Outbound) -> ClientId {
        let id = self.registry.register(peer, outbound).id();
        info!(client = %id, peer = %peer, "New client connection established");
        id
    }

    /// Handle one decoded message from `sender`.
    pub fn dispatch(&mut self, sender: ClientId, msg: &Message) -> Result<()> {
        debug!(client = %sender, context = %msg.context, target = ?msg.target, "Dispatching message");

        match msg.target {
            Target::Info => handshake::identify(&mut self.registry, sender, &msg.data, &self.metrics),
            Target::GlobalBroadcast => {
                router::broadcast_global(&self.registry, sender, msg, &self.metrics).map(|_| ())
            }
            Target::GroupBroadcast => {
                router::broadcast_group(&self.registry, sender, msg, &self.metrics).map(|_| ())
            }
            Target::Client(receiver) => router::send_direct(&self.registry, receiver, msg, &self.metrics),
        }
    }

    /// Tear down a client: announce its departure to its group, then release its identity.
    ///
    /// Calling this for an identity that is already gone is a no-op.
    pub fn disconnect(&mut self, id: ClientId) {
        let Some(client) = self.registry.find_by_id(id) else {
            return;
        };
        let peer = client.peer();

        match client.server_info() {
            Some(info) if !info.hidden => {
                let farewell = Message::control(contexts::DISCONNECT, json!(id.get()));
                if let Err(e) =
                    router::broadcast_group(&self.registry, id, &farewell, &self.metrics)
                {
                    debug!(client = %id, error = %e, "Disconnect announcement failed");
                }
                info!(client = %id, ip = %info.ip, port = info.port, name = %info.name, "Client disconnected");
            }
            Some(_) => info!(client = %id, peer = %peer, "Hidden client disconnected"),
            None => info!(client = %id, peer = %peer, "Unidentified client disconnected"),
        }

        self.registry.deregister(id);
    }
}
