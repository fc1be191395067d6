//! UDP request/reply adapter
//!
//! Serves the controller's read/write requests on the configured request
//! port. One datagram in, at most one datagram out, always back to the
//! originating address. No connection state is kept across requests and
//! seqids are never assumed to arrive in order.
//!
//! # Request handling
//!
//! | Field         | Rule                                                  |
//! |---------------|-------------------------------------------------------|
//! | `seqid`       | required u64, echoed exactly in the reply             |
//! | `timestamp`   | required u64, validated and otherwise ignored         |
//! | `writevalues` | optional object, merged into the store atomically     |
//! | `read`        | optional array, values of the named signals returned  |
//!
//! A datagram over 10240 bytes, malformed JSON, a non-object root, or a
//! missing/mistyped field drops the request silently: no reply and no store
//! mutation. `readvalues` appears in the reply exactly when `read` appeared
//! in the request, even when no requested signal exists. Reply timestamps
//! come from the adapter's own clock and strictly increase across replies.
//!
//! On a socket-level error the adapter drops the socket, waits briefly, and
//! rebinds, so a transient network failure never kills the serving thread.

use crate::clock::MonotonicClock;
use crate::memory::SignalStore;
use crate::server::wire::MAX_MESSAGE_SIZE;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Largest datagram the socket will pull off the wire; anything beyond the
/// message limit is dropped after the length check
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Read timeout so the receive loop observes the shutdown flag
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause before rebinding after a socket error
const SOCKET_RETRY_DELAY: Duration = Duration::from_millis(200);

/// UDP request/reply server for signal reads and writes
pub struct UdpResponder {
    store: Arc<SignalStore>,
    bind_addr: String,
    running: Arc<AtomicBool>,
    clock: MonotonicClock,
}

impl UdpResponder {
    pub fn new(store: Arc<SignalStore>, bind_addr: String, running: Arc<AtomicBool>) -> Self {
        Self {
            store,
            bind_addr,
            running,
            clock: MonotonicClock::new(),
        }
    }

    /// Run the request loop until the running flag clears.
    ///
    /// Socket errors reset the socket rather than propagate; the loop only
    /// returns on shutdown.
    pub fn run(&self) {
        log::info!("UDP request server starting on {}", self.bind_addr);

        while self.running.load(Ordering::Relaxed) {
            let socket = match self.bind() {
                Ok(socket) => socket,
                Err(e) => {
                    log::error!("failed to bind UDP request socket on {}: {}", self.bind_addr, e);
                    thread::sleep(SOCKET_RETRY_DELAY);
                    continue;
                }
            };

            if let Err(e) = self.serve(&socket) {
                log::error!("UDP request socket error, rebinding: {}", e);
                thread::sleep(SOCKET_RETRY_DELAY);
            }
        }

        log::info!("UDP request server stopped");
    }

    fn bind(&self) -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind(&self.bind_addr)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(socket)
    }

    /// Serve requests on a bound socket until shutdown or a socket error.
    fn serve(&self, socket: &UdpSocket) -> std::io::Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while self.running.load(Ordering::Relaxed) {
            let (len, peer) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => return Err(e),
            };

            if len > MAX_MESSAGE_SIZE {
                log::warn!("dropping oversized datagram from {} ({} bytes)", peer, len);
                continue;
            }

            let Some(reply) = self.handle_request(&buf[..len]) else {
                continue;
            };
            match serde_json::to_vec(&reply) {
                Ok(payload) => {
                    if let Err(e) = socket.send_to(&payload, peer) {
                        log::warn!("failed to send reply to {}: {}", peer, e);
                    }
                }
                Err(e) => log::warn!("failed to serialize reply for {}: {}", peer, e),
            }
        }

        Ok(())
    }

    /// Decode one request and build its reply.
    ///
    /// `None` means the request is dropped. Both optional sections are
    /// validated before the store is touched, so a dropped request never
    /// mutates state.
    fn handle_request(&self, payload: &[u8]) -> Option<Value> {
        let parsed: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("dropping malformed request: {}", e);
                return None;
            }
        };
        let Some(request) = parsed.as_object() else {
            log::debug!("dropping request with non-object root");
            return None;
        };

        let Some(seqid) = request.get("seqid").and_then(Value::as_u64) else {
            log::debug!("dropping request without valid seqid");
            return None;
        };
        if request.get("timestamp").and_then(Value::as_u64).is_none() {
            log::debug!("dropping request without valid timestamp");
            return None;
        }

        let writes = match request.get("writevalues") {
            Some(section) => match section.as_object() {
                Some(map) => Some(
                    map.iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<HashMap<String, Value>>(),
                ),
                None => {
                    log::debug!("dropping request with non-object writevalues");
                    return None;
                }
            },
            None => None,
        };
        let reads = match request.get("read") {
            Some(section) => match section.as_array() {
                Some(list) => Some(
                    list.iter()
                        .filter_map(|name| name.as_str().map(String::from))
                        .collect::<Vec<String>>(),
                ),
                None => {
                    log::debug!("dropping request with non-array read");
                    return None;
                }
            },
            None => None,
        };

        if let Some(writes) = writes {
            self.store.apply(writes);
        }

        let mut reply = Map::new();
        reply.insert("seqid".to_string(), Value::from(seqid));
        reply.insert("timestamp".to_string(), Value::from(self.clock.now()));
        if let Some(names) = reads {
            let values: Map<String, Value> = self.store.get(&names).into_iter().collect();
            reply.insert("readvalues".to_string(), Value::Object(values));
        }
        Some(Value::Object(reply))
    }
}
