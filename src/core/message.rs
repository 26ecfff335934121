//! # Relay Messages
//!
//! The single message shape carried by every frame, inbound and outbound:
//!
//! ```text
//! { "context": string, "data": any, "sender"?: integer, "target": "b" | "g" | "i" | integer }
//! ```
//!
//! Decoding is two steps: the frame is parsed as JSON (failure is a `MalformedFrame`), then the
//! value is validated field by field (failure is a `SchemaViolation`). Validation is a plain
//! function over `serde_json::Value`; fields outside the schema are dropped, so anything the hub
//! forwards is the re-serialized, validated message.

use bytes::Bytes;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::error::{constants, RelayError, Result};
use crate::protocol::registry::ClientId;

/// Wire token for a global broadcast
pub const TARGET_BROADCAST: &str = "b";
/// Wire token for a group broadcast
pub const TARGET_GROUP: &str = "g";
/// Wire token for the control channel
pub const TARGET_INFO: &str = "i";

/// Control message contexts emitted by the hub
pub mod contexts {
    pub const IDENTIFY: &str = "Identify";
    pub const CONNECT: &str = "Connect";
    pub const DISCONNECT: &str = "Disconnect";
}

/// Where a message is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every identified client except the sender (`"b"`)
    GlobalBroadcast,
    /// Every identified client in the sender's group except the sender (`"g"`)
    GroupBroadcast,
    /// The control channel (`"i"`)
    Info,
    /// A single client by identity; unmatched ids are resolved during routing
    Client(ClientId),
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Target::GlobalBroadcast => serializer.serialize_str(TARGET_BROADCAST),
            Target::GroupBroadcast => serializer.serialize_str(TARGET_GROUP),
            Target::Info => serializer.serialize_str(TARGET_INFO),
            Target::Client(id) => serializer.serialize_i64(id.get()),
        }
    }
}

/// A validated relay message.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Message {
    pub context: String,
    pub data: Value,
    /// Reserved for attribution; the hub neither fills nor checks it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Number>,
    pub target: Target,
}

impl Message {
    /// Build a message without a sender.
    pub fn new(context: impl Into<String>, data: Value, target: Target) -> Self {
        Self {
            context: context.into(),
            data,
            sender: None,
            target,
        }
    }

    /// Build a control-channel message as emitted by the hub.
    pub fn control(context: &str, data: Value) -> Self {
        Self::new(context, data, Target::Info)
    }

    /// Parse and validate a single frame.
    pub fn decode(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| RelayError::MalformedFrame(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value against the message schema.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(schema(constants::ERR_NOT_AN_OBJECT));
        };

        let context = match fields.remove("context") {
            Some(Value::String(context)) if !context.is_empty() => context,
            _ => return Err(schema(constants::ERR_CONTEXT_REQUIRED)),
        };

        let data = match fields.remove("data") {
            Some(Value::Null) | None => return Err(schema(constants::ERR_DATA_REQUIRED)),
            Some(data) => data,
        };

        let sender = match fields.remove("sender") {
            None | Some(Value::Null) => None,
            Some(Value::Number(number)) if is_integral(&number) => Some(number),
            Some(_) => return Err(schema(constants::ERR_SENDER_TYPE)),
        };

        let target = parse_target(fields.remove("target"))?;

        Ok(Self {
            context,
            data,
            sender,
            target,
        })
    }

    /// Serialize to the frame payload (without the delimiter).
    pub fn to_frame(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| RelayError::MalformedFrame(e.to_string()))
    }
}

fn parse_target(value: Option<Value>) -> Result<Target> {
    match value {
        None | Some(Value::Null) => Err(schema(constants::ERR_TARGET_REQUIRED)),
        Some(Value::String(token)) => match token.as_str() {
            TARGET_BROADCAST => Ok(Target::GlobalBroadcast),
            TARGET_GROUP => Ok(Target::GroupBroadcast),
            TARGET_INFO => Ok(Target::Info),
            _ => Err(schema(constants::ERR_TARGET_TYPE)),
        },
        Some(value @ Value::Number(_)) => as_integer(&value)
            .map(|id| Target::Client(ClientId::from(id)))
            .ok_or_else(|| schema(constants::ERR_TARGET_TYPE)),
        Some(_) => Err(schema(constants::ERR_TARGET_TYPE)),
    }
}

/// Any integer, including integral floats such as `2.0`.
///
/// Values outside the `i64` range saturate; no client can hold such an identity anyway.
pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };

    if let Some(n) = number.as_i64() {
        return Some(n);
    }
    if number.is_u64() {
        return Some(i64::MAX);
    }

    number
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

fn is_integral(number: &Number) -> bool {
    number.is_i64() || number.is_u64() || number.as_f64().is_some_and(|f| f.fract() == 0.0)
}

/// Remove and return a required non-empty string field.
pub(crate) fn take_string(fields: &mut Map<String, Value>, name: &str) -> Result<String> {
    match fields.remove(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(RelayError::SchemaViolation(format!(
            "`{name}` must be a non-empty string"
        ))),
    }
}

fn schema(reason: &str) -> RelayError {
    RelayError::SchemaViolation(reason.to_string())
}
