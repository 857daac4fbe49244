//! Modem-to-supervisor event plumbing and the call log.
//!
//! The modem engine never holds a reference to the supervisor; it pushes
//! events into a bounded channel that the supervisor drains on its tick.
//! That breaks the ownership cycle (supervisor -> pipelines -> filters ->
//! modem engine -> supervisor) that would otherwise form. A full channel
//! drops the event and counts the drop rather than blocking a worker
//! mid-quantum.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

use serde::Serialize;
use tracing::warn;

/// Events the modem engine raises for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// ATD - place the configured call (dial string recorded for the log)
    DialRequested(String),
    /// ATA, or hardware auto-answer firing
    AnswerRequested,
    /// ATH, or DTR drop with &D2
    HangupRequested,
    /// ATZ<n>, or DTR drop with &D3
    ResetRequested(u8),
    /// +++ completed; the engine is now in command mode with the call held
    EscapedToCommand,
    /// ATO requested a return to online (data) mode with the call held
    ReturnOnlineRequested,
    /// A RING was observed (emulated or from fronted hardware)
    RingObserved { count: u8 },
    /// Fronted hardware reported the call up
    HardwareConnect(Option<u32>),
    /// Fronted hardware reported the call down
    HardwareCarrierLost,
}

/// Sending half of the bounded event channel.
#[derive(Clone)]
pub struct EventSender {
    tx: SyncSender<ModemEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Push without blocking; a full queue drops the event and counts it.
    pub fn send(&self, event: ModemEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(?event, "event queue full, dropping");
            }
            Err(TrySendError::Disconnected(_)) => {
                // Supervisor is gone; shutdown is in progress
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half of the bounded event channel.
pub struct EventReceiver {
    rx: Receiver<ModemEvent>,
}

impl EventReceiver {
    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<ModemEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create the bounded modem event channel.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = sync_channel(capacity);
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx },
    )
}

/// What happened to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEvent {
    Connected,
    Disconnected,
}

/// One line of the call log.
#[derive(Debug, Clone, Serialize)]
pub struct CallLogEntry {
    /// Wall-clock time of the event
    pub timestamp: jiff::Timestamp,
    /// Peer address, or the dial string for failed attempts
    pub peer: String,
    pub event: CallEvent,
    /// Why a call ended (carrier loss, escape+hangup, peer reset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Bounded in-memory ring of call events, newest last.
#[derive(Debug)]
pub struct CallLog {
    entries: VecDeque<CallLogEntry>,
    capacity: usize,
}

impl CallLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, peer: &str, event: CallEvent, reason: Option<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(CallLogEntry {
            timestamp: jiff::Timestamp::now(),
            peer: peer.to_string(),
            event,
            reason,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &CallLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_drain() {
        let (tx, rx) = event_channel(8);
        tx.send(ModemEvent::AnswerRequested);
        tx.send(ModemEvent::RingObserved { count: 1 });

        let events = rx.drain();
        assert_eq!(
            events,
            vec![
                ModemEvent::AnswerRequested,
                ModemEvent::RingObserved { count: 1 }
            ]
        );
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (tx, _rx) = event_channel(2);
        tx.send(ModemEvent::AnswerRequested);
        tx.send(ModemEvent::AnswerRequested);
        tx.send(ModemEvent::AnswerRequested);
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn test_send_after_receiver_gone() {
        let (tx, rx) = event_channel(2);
        drop(rx);
        // Must not panic or count as a drop
        tx.send(ModemEvent::HangupRequested);
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn test_call_log_bounded() {
        let mut log = CallLog::new(2);
        log.record("a:1", CallEvent::Connected, None);
        log.record("a:1", CallEvent::Disconnected, Some("carrier lost".to_string()));
        log.record("b:2", CallEvent::Connected, None);

        assert_eq!(log.len(), 2);
        let peers: Vec<&str> = log.entries().map(|e| e.peer.as_str()).collect();
        assert_eq!(peers, vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_call_log_serializes() {
        let mut log = CallLog::new(4);
        log.record("127.0.0.1:2323", CallEvent::Connected, None);
        let entry = log.entries().next().unwrap();
        let json = serde_json::to_string(entry).unwrap();
        assert!(json.contains("\"connected\""));
        assert!(json.contains("127.0.0.1:2323"));
    }
}
