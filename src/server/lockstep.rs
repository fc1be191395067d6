//! Lock-step TCP request/reply adapter
//!
//! Synchronous front-end for controllers that speak a strict
//! one-request-then-one-reply protocol. The adapter serves a single
//! connection at a time and never reads a second request before the first
//! reply is written, so pipelining is structurally impossible:
//!
//! ```text
//! AWAITING_REQUEST ──frame──▶ PROCESSING ──reply──▶ AWAITING_REQUEST
//! ```
//!
//! # Commands
//!
//! | Request                                      | Reply                 |
//! |----------------------------------------------|-----------------------|
//! | `{"command":"read","keys":[...]}`            | `{"keyvalues":{...}}` |
//! | `{"command":"write","keyvalues":{...}}`      | `{}`                  |
//! | anything else                                | `{}`                  |
//!
//! Missing keys are omitted from a read reply; a write replies `{}` whether
//! or not any value changed. Every request gets exactly one reply, even a
//! malformed one: the peer blocks until the reply arrives, so dropping a
//! request would wedge the transport. A frame declaring more than the
//! message limit is answered with `{}` and the connection is closed, since
//! the stream cannot be resynchronized past it.

use crate::memory::SignalStore;
use crate::server::wire::{self, FrameRead};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Read timeout so connection loops observe the shutdown flag
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll interval while no connection is pending
const ACCEPT_POLL_DELAY: Duration = Duration::from_millis(10);

/// Initial capacity for the request buffer (typical request size)
const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Lock-step request/reply server for signal reads and writes
pub struct LockstepServer {
    store: Arc<SignalStore>,
    bind_addr: String,
    running: Arc<AtomicBool>,
}

impl LockstepServer {
    pub fn new(store: Arc<SignalStore>, bind_addr: String, running: Arc<AtomicBool>) -> Self {
        Self {
            store,
            bind_addr,
            running,
        }
    }

    /// Bind the listener and serve until the running flag clears.
    pub fn run(&self) -> crate::error::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        log::info!("lock-step server listening on {}", self.bind_addr);

        self.serve_listener(&listener);

        log::info!("lock-step server stopped");
        Ok(())
    }

    /// Accept loop: one connection served to completion at a time.
    fn serve_listener(&self, listener: &TcpListener) {
        while self.running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("lock-step client connected: {}", peer);
                    match self.serve_connection(stream) {
                        Ok(()) => log::info!("lock-step client disconnected: {}", peer),
                        Err(e) => log::warn!("lock-step connection to {} failed: {}", peer, e),
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_DELAY);
                }
                Err(e) => log::error!("lock-step accept error: {}", e),
            }
        }
    }

    /// Serve one connection: read a request, send its reply, repeat.
    fn serve_connection(&self, mut stream: TcpStream) -> crate::error::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut buf = Vec::with_capacity(INITIAL_BUFFER_CAPACITY);
        while self.running.load(Ordering::Relaxed) {
            match wire::read_frame(&mut stream, &mut buf) {
                Ok(FrameRead::Complete) => {
                    let reply = self.handle_request(&buf);
                    let payload = serde_json::to_vec(&reply)?;
                    wire::write_frame(&mut stream, &payload)?;
                }
                Ok(FrameRead::Idle) => continue,
                Ok(FrameRead::TooLarge(len)) => {
                    log::warn!(
                        "lock-step request of {} bytes exceeds limit, closing connection",
                        len
                    );
                    let _ = wire::write_frame(&mut stream, b"{}");
                    break;
                }
                Err(crate::error::Error::Io(e))
                    if e.kind() == ErrorKind::UnexpectedEof
                        || e.kind() == ErrorKind::ConnectionReset =>
                {
                    let _ = stream.shutdown(Shutdown::Both);
                    return Ok(());
                }
                Err(e) => {
                    let _ = stream.shutdown(Shutdown::Both);
                    return Err(e);
                }
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
        Ok(())
    }

    /// Decode one request and build its reply. Always returns a reply;
    /// anything malformed answers `{}` to keep the peer unblocked.
    fn handle_request(&self, payload: &[u8]) -> Value {
        let parsed: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("malformed lock-step request: {}", e);
                return empty_reply();
            }
        };
        let Some(request) = parsed.as_object() else {
            log::warn!("lock-step request root is not an object");
            return empty_reply();
        };

        match request.get("command").and_then(Value::as_str) {
            Some("read") => {
                let Some(keys) = request.get("keys").and_then(Value::as_array) else {
                    log::warn!("lock-step read without keys list");
                    return empty_reply();
                };
                let names: Vec<String> = keys
                    .iter()
                    .filter_map(|key| key.as_str().map(String::from))
                    .collect();
                let values: Map<String, Value> = self.store.get(&names).into_iter().collect();

                let mut reply = Map::new();
                reply.insert("keyvalues".to_string(), Value::Object(values));
                Value::Object(reply)
            }
            Some("write") => {
                let Some(keyvalues) = request.get("keyvalues").and_then(Value::as_object) else {
                    log::warn!("lock-step write without keyvalues mapping");
                    return empty_reply();
                };
                let writes: HashMap<String, Value> = keyvalues
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.store.apply(writes);
                empty_reply()
            }
            other => {
                log::warn!("unsupported lock-step command: {:?}", other);
                empty_reply()
            }
        }
    }
}

fn empty_reply() -> Value {
    Value::Object(Map::new())
}
