//! Change notification pump.
//!
//! Decouples signal mutation from notification transmission: the store
//! pushes [`ChangeEvent`]s onto a bounded feed at commit time, and a single
//! dedicated thread drains the feed in commit order into a
//! [`NotificationSink`]. A slow or failing sink never stalls the store or
//! either request path; a failed delivery is dropped with a logged error
//! and never retried, matching the unreliable transport underneath.

use crate::error::Result;
use crate::memory::ChangeEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll interval for the shutdown flag while the feed is idle
const FEED_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Transport half of the notification path.
///
/// Implemented by the UDP notification sender; kept as a trait seam so the
/// pump can be exercised without a socket.
pub trait NotificationSink: Send {
    fn deliver(&mut self, event: &ChangeEvent) -> Result<()>;
}

/// Sequential consumer that forwards change events to a sink.
pub struct ChangeNotifier {
    thread: Option<JoinHandle<()>>,
}

impl ChangeNotifier {
    /// Spawn the notifier thread.
    ///
    /// Runs until the running flag clears or the feed disconnects (the
    /// store's sending side was dropped).
    pub fn spawn(
        events: Receiver<ChangeEvent>,
        mut sink: Box<dyn NotificationSink>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let thread = thread::Builder::new()
            .name("change-notifier".to_string())
            .spawn(move || {
                log::info!("change notifier started");
                while running.load(Ordering::Relaxed) {
                    match events.recv_timeout(FEED_POLL_TIMEOUT) {
                        Ok(event) => {
                            log::debug!(
                                "delivering change event ({} signals, ts {})",
                                event.changed.len(),
                                event.timestamp
                            );
                            if let Err(e) = sink.deliver(&event) {
                                log::error!("failed to deliver change notification: {}", e);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("change notifier stopped");
            })?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    /// Wait for the notifier thread to finish.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crossbeam_channel::bounded;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingSink {
        delivered: Arc<Mutex<Vec<ChangeEvent>>>,
        fail_on: Option<u64>,
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&mut self, event: &ChangeEvent) -> Result<()> {
            if self.fail_on == Some(event.timestamp) {
                return Err(Error::Other("sink unavailable".to_string()));
            }
            self.delivered.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn event(n: u64) -> ChangeEvent {
        ChangeEvent {
            changed: HashMap::from([("n".to_string(), json!(n))]),
            timestamp: n,
        }
    }

    fn wait_for_count(delivered: &Arc<Mutex<Vec<ChangeEvent>>>, count: usize) {
        for _ in 0..100 {
            if delivered.lock().unwrap().len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("sink never received {} events", count);
    }

    #[test]
    fn test_events_delivered_in_order() {
        let (tx, rx) = bounded(16);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let sink = RecordingSink {
            delivered: Arc::clone(&delivered),
            fail_on: None,
        };
        let notifier = ChangeNotifier::spawn(rx, Box::new(sink), running).unwrap();

        for n in 1..=5 {
            tx.send(event(n)).unwrap();
        }
        wait_for_count(&delivered, 5);
        let seen = delivered.lock().unwrap().clone();
        assert_eq!(seen, (1..=5).map(event).collect::<Vec<_>>());

        drop(tx);
        notifier.join();
    }

    #[test]
    fn test_sink_failure_drops_event_only() {
        let (tx, rx) = bounded(16);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let sink = RecordingSink {
            delivered: Arc::clone(&delivered),
            fail_on: Some(2),
        };
        let notifier = ChangeNotifier::spawn(rx, Box::new(sink), running).unwrap();

        for n in 1..=3 {
            tx.send(event(n)).unwrap();
        }
        wait_for_count(&delivered, 2);
        let seen = delivered.lock().unwrap().clone();
        assert_eq!(seen, vec![event(1), event(3)]);

        drop(tx);
        notifier.join();
    }

    #[test]
    fn test_store_changes_reach_udp_controller() {
        use crate::memory::SignalStore;
        use crate::server::UdpNotifier;
        use std::net::UdpSocket;

        let controller = UdpSocket::bind("127.0.0.1:0").unwrap();
        controller.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let controller_addr = controller.local_addr().unwrap();

        let (store, events) = SignalStore::new();
        let running = Arc::new(AtomicBool::new(true));
        let sink = UdpNotifier::bind("127.0.0.1:0", controller_addr).unwrap();
        let notifier =
            ChangeNotifier::spawn(events, Box::new(sink), Arc::clone(&running)).unwrap();

        let committed = store
            .apply(HashMap::from([("a".to_string(), json!("x"))]))
            .unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = controller.recv_from(&mut buf).unwrap();
        let notification: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(notification["changevalues"], json!({"a": "x"}));
        assert_eq!(notification["timestamp"], json!(committed.timestamp));

        // an idempotent write emits nothing
        assert!(store.apply(HashMap::from([("a".to_string(), json!("x"))])).is_none());
        controller.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        assert!(controller.recv_from(&mut buf).is_err());

        running.store(false, Ordering::Relaxed);
        notifier.join();
    }

    #[test]
    fn test_running_flag_stops_notifier() {
        let (tx, rx) = bounded::<ChangeEvent>(16);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let sink = RecordingSink {
            delivered,
            fail_on: None,
        };
        let notifier = ChangeNotifier::spawn(rx, Box::new(sink), Arc::clone(&running)).unwrap();

        running.store(false, Ordering::Relaxed);
        notifier.join();
        drop(tx);
    }
}
