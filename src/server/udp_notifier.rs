//! UDP change-notification sender
//!
//! Uni-directional push channel to the supervisory controller: bound to
//! request_port + 1, one datagram per change batch, no inbound leg and no
//! acknowledgment. A batch whose serialized form would exceed the datagram
//! limit is split into several self-contained notifications covering
//! disjoint subsets of the changed signals, all stamped with the batch's
//! commit timestamp.

use crate::error::Result;
use crate::memory::ChangeEvent;
use crate::notify::NotificationSink;
use crate::server::wire::MAX_MESSAGE_SIZE;
use serde_json::{Map, Value};
use std::net::{SocketAddr, UdpSocket};

/// Sends change notifications to a fixed controller address
pub struct UdpNotifier {
    socket: UdpSocket,
    controller: SocketAddr,
}

impl UdpNotifier {
    /// Bind the notification socket. The destination is configuration, never
    /// derived from inbound traffic.
    pub fn bind(bind_addr: &str, controller: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        log::info!(
            "UDP notifications from {} to controller {}",
            socket.local_addr()?,
            controller
        );
        Ok(Self { socket, controller })
    }

    /// Serialize one event into datagram payloads, splitting when the whole
    /// batch would exceed the datagram limit.
    fn datagrams(event: &ChangeEvent) -> Result<Vec<Vec<u8>>> {
        let whole = notification_payload(event.changed.iter(), event.timestamp)?;
        if whole.len() <= MAX_MESSAGE_SIZE {
            return Ok(vec![whole]);
        }

        let envelope_len = notification_payload(std::iter::empty(), event.timestamp)?.len();
        let mut payloads = Vec::new();
        let mut chunk: Vec<(&String, &Value)> = Vec::new();
        let mut chunk_len = envelope_len;

        for (key, value) in &event.changed {
            // serialized footprint of one `"key":value` entry plus separator
            let entry_len = serde_json::to_vec(key)?.len() + serde_json::to_vec(value)?.len() + 2;
            if !chunk.is_empty() && chunk_len + entry_len > MAX_MESSAGE_SIZE {
                payloads.push(notification_payload(chunk.drain(..), event.timestamp)?);
                chunk_len = envelope_len;
            }
            chunk.push((key, value));
            chunk_len += entry_len;
        }
        if !chunk.is_empty() {
            payloads.push(notification_payload(chunk.into_iter(), event.timestamp)?);
        }

        for payload in &payloads {
            if payload.len() > MAX_MESSAGE_SIZE {
                log::warn!(
                    "notification datagram of {} bytes exceeds limit and cannot be split further",
                    payload.len()
                );
            }
        }
        Ok(payloads)
    }
}

fn notification_payload<'a, I>(changed: I, timestamp: u64) -> Result<Vec<u8>>
where
    I: Iterator<Item = (&'a String, &'a Value)>,
{
    let values: Map<String, Value> = changed.map(|(k, v)| (k.clone(), v.clone())).collect();
    let mut notification = Map::new();
    notification.insert("changevalues".to_string(), Value::Object(values));
    notification.insert("timestamp".to_string(), Value::from(timestamp));
    Ok(serde_json::to_vec(&Value::Object(notification))?)
}

impl NotificationSink for UdpNotifier {
    fn deliver(&mut self, event: &ChangeEvent) -> Result<()> {
        for payload in Self::datagrams(event)? {
            self.socket.send_to(&payload, self.controller)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    fn event(changed: HashMap<String, Value>) -> ChangeEvent {
        ChangeEvent {
            changed,
            timestamp: 77,
        }
    }

    #[test]
    fn test_small_event_is_one_datagram() {
        let event = event(HashMap::from([("a".to_string(), json!("x"))]));
        let payloads = UdpNotifier::datagrams(&event).unwrap();
        assert_eq!(payloads.len(), 1);

        let parsed: Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(parsed, json!({"changevalues": {"a": "x"}, "timestamp": 77}));
    }

    #[test]
    fn test_oversized_event_splits_into_disjoint_datagrams() {
        // 300 keys with 64-byte values serializes well past the limit
        let changed: HashMap<String, Value> = (0..300)
            .map(|i| (format!("signal{:03}", i), json!("v".repeat(64))))
            .collect();
        let event = event(changed.clone());

        let payloads = UdpNotifier::datagrams(&event).unwrap();
        assert!(payloads.len() > 1);

        let mut seen = HashSet::new();
        for payload in &payloads {
            assert!(payload.len() <= MAX_MESSAGE_SIZE);
            let parsed: Value = serde_json::from_slice(payload).unwrap();
            assert_eq!(parsed["timestamp"], json!(77));
            let values = parsed["changevalues"].as_object().unwrap();
            assert!(!values.is_empty());
            for (key, value) in values {
                assert_eq!(value, &changed[key]);
                assert!(seen.insert(key.clone()), "key {} sent twice", key);
            }
        }
        assert_eq!(seen.len(), changed.len());
    }

    #[test]
    fn test_unsplittable_entry_is_still_sent() {
        let huge = "x".repeat(MAX_MESSAGE_SIZE * 2);
        let event = event(HashMap::from([("big".to_string(), json!(huge))]));
        let payloads = UdpNotifier::datagrams(&event).unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].len() > MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_deliver_reaches_controller_address() {
        let controller = UdpSocket::bind("127.0.0.1:0").unwrap();
        controller.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let controller_addr = controller.local_addr().unwrap();

        let mut notifier = UdpNotifier::bind("127.0.0.1:0", controller_addr).unwrap();
        notifier
            .deliver(&event(HashMap::from([("a".to_string(), json!("x"))])))
            .unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = controller.recv_from(&mut buf).unwrap();
        let parsed: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(parsed["changevalues"], json!({"a": "x"}));
        assert_eq!(parsed["timestamp"], json!(77));
    }
}
