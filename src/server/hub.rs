//! Notification hub
//!
//! Owns the connection registry and the subscription index behind one lock,
//! runs the subscribe/unsubscribe control protocol and fans published events
//! out to current subscribers.

use crate::config::HubConfig;
use crate::server::connections::{ConnectionHandle, ConnectionRegistry, OutboundMessage};
use crate::server::protocol::{ControlMessage, Envelope, OpCode, ServerMessage};
use crate::server::subscriptions::{SubscriptionChange, SubscriptionIndex};
use crate::topics::{Topic, TopicSet};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
}

/// Result of one fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    #[serde(rename = "subscribers")]
    pub subscriber_count: usize,
    #[serde(rename = "successful")]
    pub success_count: usize,
}

#[derive(Debug)]
struct HubState {
    registry: ConnectionRegistry,
    index: SubscriptionIndex,
}

pub struct NotificationHub {
    topics: TopicSet,
    config: HubConfig,
    state: Mutex<HubState>,
}

impl NotificationHub {
    pub fn new(topics: TopicSet, config: HubConfig) -> Self {
        let state = HubState {
            registry: ConnectionRegistry::new(),
            index: SubscriptionIndex::new(topics.clone()),
        };

        Self {
            topics,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Admit a connection for `principal_id`.
    ///
    /// Registers a fresh handle, applies the initial `subscriptions` header and
    /// queues HELLO as the first frame. A previous connection for the same id
    /// loses its subscriptions and is told to close.
    pub fn open(
        &self,
        principal_id: i64,
        subscriptions: Option<&str>,
    ) -> (ConnectionHandle, mpsc::Receiver<OutboundMessage>) {
        let (handle, rx) = ConnectionHandle::new(principal_id, self.config.outbound_buffer);

        let (superseded, subscribed) = {
            let mut state = self.state.lock();
            let superseded = Self::register_locked(&mut state, handle.clone());

            if let Some(header) = subscriptions {
                let requested = self.topics.filter_header(header);
                state
                    .index
                    .subscribe(principal_id, requested.iter().map(Topic::as_str));
            }

            (superseded, state.index.subscriptions_of(principal_id))
        };

        if let Some(previous) = superseded {
            info!(
                principal_id = principal_id,
                conn_id = %previous.conn_id(),
                "Closing superseded connection"
            );
            previous.close();
        }

        info!(
            principal_id = principal_id,
            conn_id = %handle.conn_id(),
            subscriptions = subscribed.len(),
            "Connection registered"
        );

        if let Err(e) = handle.try_send(&ServerMessage::hello(principal_id, subscribed)) {
            warn!(principal_id = principal_id, error = %e, "Failed to queue HELLO");
        }

        (handle, rx)
    }

    /// Register an existing handle, replacing and closing any previous one
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let superseded = {
            let mut state = self.state.lock();
            Self::register_locked(&mut state, handle)
        };

        if let Some(previous) = &superseded {
            previous.close();
        }

        superseded
    }

    fn register_locked(state: &mut HubState, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let principal_id = handle.principal_id();
        let superseded = state.registry.register(handle);

        if superseded.is_some() {
            state.index.remove_everywhere(principal_id);
        }

        superseded
    }

    /// Remove the registry entry for `principal_id` and all its subscriptions.
    ///
    /// Returns whether an entry was present.
    pub fn unregister(&self, principal_id: i64) -> bool {
        let mut state = self.state.lock();
        state.index.remove_everywhere(principal_id);
        state.registry.unregister(principal_id).is_some()
    }

    /// Tear down `handle` if it is still the registered connection for its
    /// principal. A superseded handle leaves its replacement untouched.
    pub fn release(&self, handle: &ConnectionHandle) -> bool {
        let principal_id = handle.principal_id();
        let mut state = self.state.lock();

        if !state.registry.is_current(handle) {
            debug!(
                principal_id = principal_id,
                conn_id = %handle.conn_id(),
                "Skipping cleanup for superseded connection"
            );
            return false;
        }

        state.index.remove_everywhere(principal_id);
        state.registry.unregister(principal_id);
        true
    }

    /// Subscribe on behalf of `handle`. `None` unless `handle` is still the
    /// registered connection for its principal.
    pub fn subscribe<'a, I>(
        &self,
        handle: &ConnectionHandle,
        requested: I,
    ) -> Option<SubscriptionChange>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.state.lock();

        if !state.registry.is_current(handle) {
            debug!(
                principal_id = handle.principal_id(),
                conn_id = %handle.conn_id(),
                "Ignoring subscribe from stale connection"
            );
            return None;
        }

        Some(state.index.subscribe(handle.principal_id(), requested))
    }

    pub fn unsubscribe<'a, I>(
        &self,
        handle: &ConnectionHandle,
        requested: I,
    ) -> Option<SubscriptionChange>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.state.lock();

        if !state.registry.is_current(handle) {
            debug!(
                principal_id = handle.principal_id(),
                conn_id = %handle.conn_id(),
                "Ignoring unsubscribe from stale connection"
            );
            return None;
        }

        Some(state.index.unsubscribe(handle.principal_id(), requested))
    }

    /// Process one inbound text frame from `handle` and produce the reply,
    /// if any
    pub fn handle_control(&self, handle: &ConnectionHandle, text: &str) -> Option<ServerMessage> {
        let principal_id = handle.principal_id();

        let value: Value = match serde_json::from_str(text) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                warn!(principal_id = principal_id, "Ignoring non-object frame");
                return None;
            }
            Err(e) => {
                warn!(principal_id = principal_id, error = %e, "Ignoring malformed frame");
                return None;
            }
        };

        let msg: ControlMessage = match serde_json::from_value(value) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(principal_id = principal_id, error = %e, "Ignoring invalid control frame");
                return None;
            }
        };

        let opcode = match msg.opcode() {
            Some(op @ (OpCode::Subscribe | OpCode::Unsubscribe)) => op,
            _ => {
                debug!(principal_id = principal_id, op = %msg.op, "Unknown op");
                return Some(ServerMessage::unknown_op(principal_id, msg.op));
            }
        };

        let Some(requested) = msg.topic_names() else {
            warn!(principal_id = principal_id, "Ignoring control frame with non-array subscriptions");
            return None;
        };

        if opcode == OpCode::Subscribe {
            let change = self.subscribe(handle, requested)?;
            Some(ServerMessage::subscription_added(
                principal_id,
                change.changed,
                change.subscribed,
            ))
        } else {
            let change = self.unsubscribe(handle, requested)?;
            Some(ServerMessage::subscription_removed(
                principal_id,
                change.changed,
                change.subscribed,
            ))
        }
    }

    /// Fan an event out to every current subscriber of `topic`.
    ///
    /// Each delivery is attempted independently; failures are logged and only
    /// reduce `success_count`.
    pub fn publish(&self, topic: &str, envelope: &Envelope) -> Result<PublishReport, HubError> {
        let topic = self
            .topics
            .get(topic)
            .ok_or_else(|| HubError::UnknownTopic(topic.to_string()))?;

        let targets: Vec<(i64, Option<ConnectionHandle>)> = {
            let state = self.state.lock();
            state
                .index
                .subscribers(topic.as_str())
                .unwrap_or_default()
                .into_iter()
                .map(|id| (id, state.registry.get(id).cloned()))
                .collect()
        };

        let subscriber_count = targets.len();
        let mut success_count = 0;

        for (user_id, handle) in targets {
            let Some(handle) = handle else {
                debug!(topic = %topic, user_id = user_id, "Subscriber has no live connection");
                continue;
            };

            match handle.try_send(&ServerMessage::event(topic, envelope, user_id)) {
                Ok(()) => success_count += 1,
                Err(e) => {
                    debug!(topic = %topic, user_id = user_id, error = %e, "Delivery failed");
                }
            }
        }

        debug!(
            topic = %topic,
            subscribers = subscriber_count,
            successful = success_count,
            "Published event"
        );

        Ok(PublishReport {
            subscriber_count,
            success_count,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn is_connected(&self, principal_id: i64) -> bool {
        self.state.lock().registry.contains(principal_id)
    }

    pub fn subscriber_ids(&self, topic: &str) -> Option<Vec<i64>> {
        self.state.lock().index.subscribers(topic)
    }

    pub fn subscriptions_of(&self, principal_id: i64) -> Vec<Topic> {
        self.state.lock().index.subscriptions_of(principal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::DPY_MOD_LOG;
    use serde_json::json;
    use std::time::Duration;

    fn hub() -> NotificationHub {
        NotificationHub::new(
            TopicSet::new([DPY_MOD_LOG, "releases"]).unwrap(),
            HubConfig::default(),
        )
    }

    fn envelope(payload: Value) -> Envelope {
        Envelope {
            application: 1,
            application_name: "modbot".to_string(),
            payload,
        }
    }

    fn frame(rx: &mut mpsc::Receiver<OutboundMessage>) -> Value {
        let msg = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&msg.payload).unwrap()
    }

    #[test]
    fn test_publish_counts_dead_subscriber() {
        let hub = hub();

        let (h42, mut rx42) = ConnectionHandle::new(42, 8);
        hub.register(h42.clone());
        let change = hub.subscribe(&h42, [DPY_MOD_LOG]).unwrap();
        assert_eq!(change.changed[0].as_str(), DPY_MOD_LOG);
        assert_eq!(change.subscribed[0].as_str(), DPY_MOD_LOG);

        let (h7, rx7) = ConnectionHandle::new(7, 8);
        hub.register(h7.clone());
        hub.subscribe(&h7, [DPY_MOD_LOG]).unwrap();
        drop(rx7);

        let report = hub.publish(DPY_MOD_LOG, &envelope(json!({"foo": 1}))).unwrap();
        assert_eq!(
            report,
            PublishReport {
                subscriber_count: 2,
                success_count: 1
            }
        );

        let event = frame(&mut rx42);
        assert_eq!(event["op"], 1);
        assert_eq!(event["subscription"], DPY_MOD_LOG);
        assert_eq!(event["payload"], json!({"foo": 1}));
        assert_eq!(event["user_id"], 42);
    }

    #[test]
    fn test_publish_attempts_every_subscriber() {
        let hub = hub();
        let mut live = Vec::new();

        for id in 0..10 {
            let (handle, rx) = ConnectionHandle::new(id, 8);
            hub.register(handle.clone());
            hub.subscribe(&handle, ["releases"]).unwrap();
            if id % 3 == 0 {
                drop(rx);
            } else {
                live.push((id, rx));
            }
        }

        let report = hub.publish("releases", &envelope(json!(null))).unwrap();
        assert_eq!(report.subscriber_count, 10);
        assert_eq!(report.success_count, 6);

        for (id, mut rx) in live {
            assert_eq!(frame(&mut rx)["user_id"], id);
        }
    }

    #[test]
    fn test_publish_full_buffer_is_a_failure() {
        let hub = NotificationHub::new(
            TopicSet::default(),
            HubConfig {
                outbound_buffer: 1,
                ..HubConfig::default()
            },
        );

        let (_handle, _rx) = hub.open(5, Some(DPY_MOD_LOG));

        // HELLO still occupies the only slot
        let report = hub.publish(DPY_MOD_LOG, &envelope(json!(1))).unwrap();
        assert_eq!(report.subscriber_count, 1);
        assert_eq!(report.success_count, 0);
    }

    #[test]
    fn test_publish_unknown_topic() {
        let hub = hub();
        assert_eq!(
            hub.publish("bogus", &envelope(json!({}))),
            Err(HubError::UnknownTopic("bogus".to_string()))
        );
    }

    #[test]
    fn test_open_sends_hello_with_header_subscriptions() {
        let hub = hub();
        let (_handle, mut rx) = hub.open(42, Some(" releases, bogus ,dpy_mod_log,releases"));

        assert_eq!(
            frame(&mut rx),
            json!({"op": 0, "user_id": 42, "subscriptions": ["dpy_mod_log", "releases"]})
        );
    }

    #[test]
    fn test_subscribe_without_connection_is_noop() {
        let hub = hub();
        let (unregistered, _rx) = ConnectionHandle::new(99, 4);
        assert!(hub.subscribe(&unregistered, [DPY_MOD_LOG]).is_none());
        assert_eq!(hub.subscriber_ids(DPY_MOD_LOG), Some(vec![]));
    }

    #[test]
    fn test_unregister_clears_every_topic() {
        let hub = hub();
        let (_handle, _rx) = hub.open(42, Some("dpy_mod_log,releases"));

        assert!(hub.unregister(42));
        assert!(!hub.unregister(42));

        for topic in hub.topics().iter() {
            assert!(!hub.subscriber_ids(topic.as_str()).unwrap().contains(&42));
        }
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_supersession_closes_old_and_keeps_new() {
        let hub = hub();

        let (old, _old_rx) = hub.open(42, Some(DPY_MOD_LOG));
        let (new, _new_rx) = hub.open(42, Some("releases"));

        tokio::time::timeout(Duration::from_millis(100), old.closed())
            .await
            .expect("superseded connection should be closed");

        // The old session's cleanup must not touch the new registration
        assert!(!hub.release(&old));
        assert!(hub.is_connected(42));
        assert_eq!(
            hub.subscriptions_of(42)
                .iter()
                .map(Topic::as_str)
                .collect::<Vec<_>>(),
            vec!["releases"]
        );

        assert!(hub.release(&new));
        assert!(!hub.is_connected(42));
        assert!(hub.subscriptions_of(42).is_empty());
    }

    #[test]
    fn test_handle_control_ops() {
        let hub = hub();
        let (handle, _rx) = hub.open(42, None);

        let reply = hub
            .handle_control(&handle, r#"{"op": 3, "subscriptions": ["dpy_mod_log", "bogus"]}"#)
            .unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "op": 2,
                "type": "SUBSCRIPTION_ADDED",
                "user_id": 42,
                "added": ["dpy_mod_log"],
                "subscribed": ["dpy_mod_log"]
            })
        );

        let reply = hub
            .handle_control(&handle, r#"{"op": "UNSUBSCRIBE", "subscriptions": ["dpy_mod_log"]}"#)
            .unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "op": 2,
                "type": "SUBSCRIPTION_REMOVED",
                "user_id": 42,
                "removed": ["dpy_mod_log"],
                "subscribed": []
            })
        );

        let reply = hub.handle_control(&handle, r#"{"op": 17}"#).unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"op": 2, "type": "UNKNOWN_OP", "user_id": 42, "received": 17})
        );

        // Unknown ops are answered whatever `subscriptions` holds
        let reply = hub
            .handle_control(&handle, r#"{"op": "PING", "subscriptions": null}"#)
            .unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"op": 2, "type": "UNKNOWN_OP", "user_id": 42, "received": "PING"})
        );
        assert!(hub
            .handle_control(&handle, r#"{"op": 9, "subscriptions": "x"}"#)
            .is_some());
    }

    #[test]
    fn test_stale_connection_cannot_touch_replacement() {
        let hub = hub();

        let (old, _old_rx) = hub.open(42, None);
        let (new, _new_rx) = hub.open(42, Some(DPY_MOD_LOG));

        // A frame the old session read before noticing it was superseded
        assert!(hub
            .handle_control(&old, r#"{"op": 3, "subscriptions": ["releases"]}"#)
            .is_none());
        assert!(hub
            .handle_control(&old, r#"{"op": 4, "subscriptions": ["dpy_mod_log"]}"#)
            .is_none());
        assert!(hub.subscribe(&old, ["releases"]).is_none());
        assert!(hub.unsubscribe(&old, [DPY_MOD_LOG]).is_none());

        assert_eq!(
            hub.subscriptions_of(42)
                .iter()
                .map(Topic::as_str)
                .collect::<Vec<_>>(),
            vec![DPY_MOD_LOG]
        );

        let change = hub.subscribe(&new, ["releases"]).unwrap();
        assert_eq!(change.subscribed.len(), 2);
    }

    #[test]
    fn test_handle_control_ignores_garbage() {
        let hub = hub();
        let (handle, _rx) = hub.open(42, None);

        assert!(hub.handle_control(&handle, "not json").is_none());
        assert!(hub.handle_control(&handle, "[3]").is_none());
        assert!(hub
            .handle_control(&handle, r#"{"op": 3, "subscriptions": "dpy_mod_log"}"#)
            .is_none());
        assert!(hub.is_connected(42));
    }
}
