//! Delivery policies over the client registry.
//!
//! Three ways out of the hub:
//! - [`send_direct`]: one receiver by identity
//! - [`broadcast_group`]: every other identified client in the sender's group
//! - [`broadcast_global`]: every other identified client
//!
//! Delivery is fire-and-forget. A message is serialized once and the same buffer is queued to each
//! recipient; a failed write is logged and counted without stopping the fan-out or undoing the
//! writes that already happened.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::message::Message;
use crate::error::{RelayError, Result};
use crate::protocol::registry::{Client, ClientId, ClientRegistry};
use crate::utils::metrics::Metrics;

/// Send a message to one identified client.
pub fn send_direct(
    registry: &ClientRegistry,
    receiver: ClientId,
    message: &Message,
    metrics: &Metrics,
) -> Result<()> {
    let client = registry
        .find_by_id(receiver)
        .ok_or(RelayError::UnknownReceiver(receiver))?;

    if !client.is_identified() {
        return Err(RelayError::ReceiverNotReady(receiver));
    }

    let frame = message.to_frame()?;
    deliver(client, frame, metrics);
    Ok(())
}

/// Send a message to every identified client except the sender, regardless of group.
///
/// Returns the number of recipients the frame was queued for.
pub fn broadcast_global(
    registry: &ClientRegistry,
    sender: ClientId,
    message: &Message,
    metrics: &Metrics,
) -> Result<usize> {
    ready_sender(registry, sender)?;
    fan_out(registry, message, metrics, |client| client.id() != sender)
}

/// Send a message to every identified client sharing the sender's group, except the sender.
///
/// Returns the number of recipients the frame was queued for.
pub fn broadcast_group(
    registry: &ClientRegistry,
    sender: ClientId,
    message: &Message,
    metrics: &Metrics,
) -> Result<usize> {
    let group = ready_sender(registry, sender)?
        .group()
        .ok_or(RelayError::SenderNotReady(sender))?;

    fan_out(registry, message, metrics, |client| {
        client.id() != sender && client.group() == Some(group)
    })
}

fn ready_sender(registry: &ClientRegistry, sender: ClientId) -> Result<&Client> {
    let client = registry
        .find_by_id(sender)
        .ok_or(RelayError::UnknownClient(sender))?;

    if client.is_identified() {
        Ok(client)
    } else {
        Err(RelayError::SenderNotReady(sender))
    }
}

fn fan_out<F>(
    registry: &ClientRegistry,
    message: &Message,
    metrics: &Metrics,
    include: F,
) -> Result<usize>
where
    F: Fn(&Client) -> bool,
{
    let frame = message.to_frame()?;

    let delivered = registry
        .iter()
        .filter(|client| client.is_identified() && include(client))
        .filter(|client| deliver(client, frame.clone(), metrics))
        .count();

    debug!(context = %message.context, recipients = delivered, "Broadcast delivered");
    Ok(delivered)
}

fn deliver(client: &Client, frame: Bytes, metrics: &Metrics) -> bool {
    let len = frame.len() as u64;
    match client.send_frame(frame) {
        Ok(()) => {
            metrics.delivery(len);
            true
        }
        Err(e) => {
            metrics.delivery_failed();
            warn!(client = %client.id(), peer = %client.peer(), error = %e, "Failed to write frame");
            false
        }
    }
}
