//! Identify handshake.
//!
//! A freshly registered client is `Unidentified`. It becomes `Identified` by sending a control
//! frame (`target = "i"`) whose `data` describes the game server behind it:
//!
//! ```text
//! {"context":"Identify","target":"i","data":{"group":"eu","ip":"10.0.0.1","name":"A","port":27015}}
//! ```
//!
//! On success the hub confirms with the assigned identity, introduces every identified member of
//! the group to the newcomer, then announces the newcomer to the group. Each member therefore learns
//! of each other member exactly once per join, whatever the join order. Hidden servers receive the
//! introductions but are never announced themselves.
//!
//! A payload that fails validation leaves the client `Unidentified`; it may try again.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::core::message::{as_integer, contexts, take_string, Message};
use crate::error::{constants, RelayError, Result};
use crate::protocol::registry::{ClientId, ClientRegistry, ServerInfo};
use crate::protocol::router;
use crate::utils::metrics::Metrics;

/// Payload of a `Connect` control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerAnnouncement<'a> {
    pub id: ClientId,
    pub ip: &'a str,
    pub name: &'a str,
    pub port: i64,
}

impl<'a> PeerAnnouncement<'a> {
    fn new(id: ClientId, info: &'a ServerInfo) -> Self {
        Self {
            id,
            ip: &info.ip,
            name: &info.name,
            port: info.port,
        }
    }

    fn into_message(self) -> Result<Message> {
        let data = serde_json::to_value(self)
            .map_err(|e| RelayError::SchemaViolation(e.to_string()))?;
        Ok(Message::control(contexts::CONNECT, data))
    }
}

/// Validate an identify payload. Unknown fields are ignored.
pub fn validate_server_info(data: &Value) -> Result<ServerInfo> {
    let Value::Object(fields) = data else {
        return Err(RelayError::SchemaViolation(
            constants::ERR_SERVER_INFO_NOT_OBJECT.to_string(),
        ));
    };
    let mut fields = fields.clone();

    let group = take_string(&mut fields, "group")?;
    let ip = take_string(&mut fields, "ip")?;
    let name = take_string(&mut fields, "name")?;

    let port = fields
        .remove("port")
        .as_ref()
        .and_then(as_integer)
        .ok_or_else(|| RelayError::SchemaViolation(constants::ERR_SERVER_INFO_PORT.to_string()))?;

    let hidden = match fields.remove("hidden") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(hidden)) => hidden,
        Some(_) => {
            return Err(RelayError::SchemaViolation(
                constants::ERR_SERVER_INFO_HIDDEN.to_string(),
            ))
        }
    };

    Ok(ServerInfo {
        group,
        ip,
        name,
        port,
        hidden,
    })
}

/// Run the identify handshake for `client` with the payload of its control frame.
#[instrument(skip_all, fields(client = %client))]
pub fn identify(
    registry: &mut ClientRegistry,
    client: ClientId,
    data: &Value,
    metrics: &Metrics,
) -> Result<()> {
    let info = match validate_server_info(data) {
        Ok(info) => info,
        Err(e) => {
            metrics.handshake_failed();
            return Err(e);
        }
    };

    if let Err(e) = registry.identify(client, info) {
        metrics.handshake_failed();
        return Err(e);
    }
    metrics.handshake_success();

    let registry = &*registry;
    let newcomer = registry
        .find_by_id(client)
        .ok_or(RelayError::UnknownClient(client))?;
    let info = newcomer
        .server_info()
        .ok_or(RelayError::SenderNotReady(client))?;

    info!(
        name = %info.name,
        group = %info.group,
        hidden = info.hidden,
        "{} has joined group {}",
        info.name,
        info.group
    );

    // Confirmation carries the assigned identity
    let confirmation = Message::control(contexts::IDENTIFY, json!(client.get()));
    router::send_direct(registry, client, &confirmation, metrics)?;

    // Introduce the existing group members to the newcomer
    let peers = registry.iter().filter(|peer| {
        peer.id() != client
            && peer
                .server_info()
                .is_some_and(|peer_info| !peer_info.hidden && peer_info.group == info.group)
    });
    for peer in peers {
        if let Some(peer_info) = peer.server_info() {
            let intro = PeerAnnouncement::new(peer.id(), peer_info).into_message()?;
            router::send_direct(registry, client, &intro, metrics)?;
        }
    }

    // Announce the newcomer to the group
    if !info.hidden {
        let welcome = PeerAnnouncement::new(client, info).into_message()?;
        let announced = router::broadcast_group(registry, client, &welcome, metrics)?;
        debug!(announced, "Newcomer announced to group");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn connect(registry: &mut ClientRegistry, port: u16) -> (ClientId, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry
            .register(SocketAddr::from(([192, 168, 1, 10], port)), tx)
            .id();
        (id, rx)
    }

    fn payload(group: &str, name: &str) -> Value {
        json!({"group": group, "ip": "10.0.0.1", "name": name, "port": 27015})
    }

    fn frames(rx: &mut UnboundedReceiver<Bytes>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_slice(&frame).unwrap());
        }
        out
    }

    #[test]
    fn validation_requires_every_field() {
        let missing = [
            json!({"ip": "1.2.3.4", "name": "A", "port": 1}),
            json!({"group": "g", "name": "A", "port": 1}),
            json!({"group": "g", "ip": "1.2.3.4", "port": 1}),
            json!({"group": "g", "ip": "1.2.3.4", "name": "A"}),
            json!({"group": "g", "ip": "1.2.3.4", "name": "A", "port": "27015"}),
            json!({"group": "", "ip": "1.2.3.4", "name": "A", "port": 1}),
            json!({"group": "g", "ip": "1.2.3.4", "name": "A", "port": 1, "hidden": "yes"}),
            json!("not an object"),
        ];
        for data in missing {
            assert!(
                matches!(validate_server_info(&data), Err(RelayError::SchemaViolation(_))),
                "accepted {data}"
            );
        }
    }

    #[test]
    fn validation_strips_unknown_fields() {
        let data = json!({"group": "g", "ip": "1.2.3.4", "name": "A", "port": 1, "map": "de_dust2"});
        let info = validate_server_info(&data).unwrap();
        assert_eq!(info.group, "g");
        assert_eq!(info.port, 1);
        assert!(!info.hidden);
    }

    #[test]
    fn any_integer_port_is_accepted() {
        for (port, expected) in [(json!(-1), -1), (json!(0), 0), (json!(27015.0), 27015)] {
            let data = json!({"group": "g", "ip": "1.2.3.4", "name": "A", "port": port});
            assert_eq!(validate_server_info(&data).unwrap().port, expected);
        }

        let data = json!({"group": "g", "ip": "1.2.3.4", "name": "A", "port": 1.5});
        assert!(matches!(validate_server_info(&data), Err(RelayError::SchemaViolation(_))));
    }

    #[test]
    fn newcomer_gets_confirmation_and_introductions() {
        let metrics = Metrics::new();
        let mut registry = ClientRegistry::new();
        let (a, mut a_rx) = connect(&mut registry, 1);
        let (b, mut b_rx) = connect(&mut registry, 2);

        identify(&mut registry, a, &payload("g1", "A"), &metrics).unwrap();
        let a_frames = frames(&mut a_rx);
        assert_eq!(a_frames, vec![json!({"context": "Identify", "data": 1, "target": "i"})]);

        identify(&mut registry, b, &payload("g1", "B"), &metrics).unwrap();
        let b_frames = frames(&mut b_rx);
        assert_eq!(b_frames.len(), 2);
        assert_eq!(b_frames[0], json!({"context": "Identify", "data": 2, "target": "i"}));
        assert_eq!(
            b_frames[1],
            json!({"context": "Connect", "data": {"id": 1, "ip": "10.0.0.1", "name": "A", "port": 27015}, "target": "i"})
        );

        let a_frames = frames(&mut a_rx);
        assert_eq!(
            a_frames,
            vec![json!({"context": "Connect", "data": {"id": 2, "ip": "10.0.0.1", "name": "B", "port": 27015}, "target": "i"})]
        );
        assert_eq!(metrics.snapshot().handshakes_success, 2);
    }

    #[test]
    fn other_groups_are_not_introduced() {
        let metrics = Metrics::new();
        let mut registry = ClientRegistry::new();
        let (a, mut a_rx) = connect(&mut registry, 1);
        let (b, mut b_rx) = connect(&mut registry, 2);

        identify(&mut registry, a, &payload("g1", "A"), &metrics).unwrap();
        identify(&mut registry, b, &payload("g2", "B"), &metrics).unwrap();

        assert_eq!(frames(&mut a_rx).len(), 1);
        assert_eq!(frames(&mut b_rx).len(), 1);
    }

    #[test]
    fn hidden_servers_are_never_announced() {
        let metrics = Metrics::new();
        let mut registry = ClientRegistry::new();
        let (a, mut a_rx) = connect(&mut registry, 1);
        let (h, mut h_rx) = connect(&mut registry, 2);
        let (c, mut c_rx) = connect(&mut registry, 3);

        identify(&mut registry, a, &payload("g1", "A"), &metrics).unwrap();
        let mut hidden = payload("g1", "H");
        hidden["hidden"] = json!(true);
        identify(&mut registry, h, &hidden, &metrics).unwrap();
        identify(&mut registry, c, &payload("g1", "C"), &metrics).unwrap();

        // A: own Identify + C's announcement, nothing about H
        let a_frames = frames(&mut a_rx);
        assert_eq!(a_frames.len(), 2);
        assert_eq!(a_frames[1]["data"]["name"], "C");

        // H still learns about A, and about C when C joins
        let h_frames = frames(&mut h_rx);
        assert_eq!(h_frames.len(), 3);
        assert_eq!(h_frames[1]["data"]["name"], "A");
        assert_eq!(h_frames[2]["data"]["name"], "C");

        // C is only introduced to A
        let c_frames = frames(&mut c_rx);
        assert_eq!(c_frames.len(), 2);
        assert_eq!(c_frames[1]["data"]["name"], "A");
    }

    #[test]
    fn invalid_payload_leaves_client_unidentified() {
        let metrics = Metrics::new();
        let mut registry = ClientRegistry::new();
        let (a, mut a_rx) = connect(&mut registry, 1);

        let result = identify(&mut registry, a, &json!({"group": "g1"}), &metrics);
        assert!(matches!(result, Err(RelayError::SchemaViolation(_))));
        assert!(!registry.find_by_id(a).unwrap().is_identified());
        assert!(frames(&mut a_rx).is_empty());

        identify(&mut registry, a, &payload("g1", "A"), &metrics).unwrap();
        assert!(registry.find_by_id(a).unwrap().is_identified());
        assert_eq!(metrics.snapshot().handshakes_failed, 1);
    }

    #[test]
    fn second_identify_is_rejected() {
        let metrics = Metrics::new();
        let mut registry = ClientRegistry::new();
        let (a, mut a_rx) = connect(&mut registry, 1);

        identify(&mut registry, a, &payload("g1", "A"), &metrics).unwrap();
        frames(&mut a_rx);

        let result = identify(&mut registry, a, &payload("g2", "A"), &metrics);
        assert!(matches!(result, Err(RelayError::AlreadyIdentified(_))));
        assert_eq!(registry.find_by_id(a).unwrap().group(), Some("g1"));
        assert!(frames(&mut a_rx).is_empty());
    }
}
