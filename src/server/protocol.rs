//! Websocket wire protocol
//!
//! Every frame is a JSON object carrying an integer `op`:
//!
//! | op | name         | direction       |
//! |----|--------------|-----------------|
//! | 0  | HELLO        | server -> client |
//! | 1  | EVENT        | server -> client |
//! | 2  | NOTIFICATION | server -> client |
//! | 3  | SUBSCRIBE    | client -> server |
//! | 4  | UNSUBSCRIBE  | client -> server |

use crate::topics::Topic;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Hello = 0,
    Event = 1,
    Notification = 2,
    Subscribe = 3,
    Unsubscribe = 4,
}

impl OpCode {
    /// Interpret a received `op` value. Accepts the integer code or the
    /// opcode name in any case.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().and_then(Self::from_code),
            Value::String(s) => match s.to_ascii_uppercase().as_str() {
                "HELLO" => Some(OpCode::Hello),
                "EVENT" => Some(OpCode::Event),
                "NOTIFICATION" => Some(OpCode::Notification),
                "SUBSCRIBE" => Some(OpCode::Subscribe),
                "UNSUBSCRIBE" => Some(OpCode::Unsubscribe),
                _ => None,
            },
            _ => None,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(OpCode::Hello),
            1 => Some(OpCode::Event),
            2 => Some(OpCode::Notification),
            3 => Some(OpCode::Subscribe),
            4 => Some(OpCode::Unsubscribe),
            _ => None,
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// The `type` of a NOTIFICATION frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    SubscriptionAdded,
    SubscriptionRemoved,
    UnknownOp,
}

/// A control frame sent by a client
#[derive(Debug, Clone, Deserialize)]
pub struct ControlMessage {
    #[serde(default)]
    pub op: Value,
    #[serde(default)]
    pub subscriptions: Option<Value>,
}

impl ControlMessage {
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_value(&self.op)
    }

    /// Requested topic names; non-string entries are skipped. A missing or
    /// null list is empty, anything other than an array is `None`.
    pub fn topic_names(&self) -> Option<Vec<&str>> {
        match &self.subscriptions {
            None => Some(Vec::new()),
            Some(Value::Array(items)) => Some(items.iter().filter_map(Value::as_str).collect()),
            Some(_) => None,
        }
    }
}

/// The application-supplied part of an EVENT frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Id of the publishing application's owner
    pub application: i64,
    pub application_name: String,
    pub payload: Value,
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Hello {
        op: OpCode,
        user_id: i64,
        subscriptions: Vec<Topic>,
    },
    SubscriptionAdded {
        op: OpCode,
        #[serde(rename = "type")]
        kind: NotificationType,
        user_id: i64,
        added: Vec<Topic>,
        subscribed: Vec<Topic>,
    },
    SubscriptionRemoved {
        op: OpCode,
        #[serde(rename = "type")]
        kind: NotificationType,
        user_id: i64,
        removed: Vec<Topic>,
        subscribed: Vec<Topic>,
    },
    UnknownOp {
        op: OpCode,
        #[serde(rename = "type")]
        kind: NotificationType,
        user_id: i64,
        received: Value,
    },
    Event {
        op: OpCode,
        subscription: Topic,
        application: i64,
        application_name: String,
        payload: Value,
        user_id: i64,
    },
}

impl ServerMessage {
    pub fn hello(user_id: i64, subscriptions: Vec<Topic>) -> Self {
        ServerMessage::Hello {
            op: OpCode::Hello,
            user_id,
            subscriptions,
        }
    }

    pub fn subscription_added(user_id: i64, added: Vec<Topic>, subscribed: Vec<Topic>) -> Self {
        ServerMessage::SubscriptionAdded {
            op: OpCode::Notification,
            kind: NotificationType::SubscriptionAdded,
            user_id,
            added,
            subscribed,
        }
    }

    pub fn subscription_removed(
        user_id: i64,
        removed: Vec<Topic>,
        subscribed: Vec<Topic>,
    ) -> Self {
        ServerMessage::SubscriptionRemoved {
            op: OpCode::Notification,
            kind: NotificationType::SubscriptionRemoved,
            user_id,
            removed,
            subscribed,
        }
    }

    pub fn unknown_op(user_id: i64, received: Value) -> Self {
        ServerMessage::UnknownOp {
            op: OpCode::Notification,
            kind: NotificationType::UnknownOp,
            user_id,
            received,
        }
    }

    /// An EVENT addressed to one subscriber
    pub fn event(topic: &Topic, envelope: &Envelope, user_id: i64) -> Self {
        ServerMessage::Event {
            op: OpCode::Event,
            subscription: topic.clone(),
            application: envelope.application,
            application_name: envelope.application_name.clone(),
            payload: envelope.payload.clone(),
            user_id,
        }
    }
}
