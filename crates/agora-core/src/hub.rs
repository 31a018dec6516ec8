use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Default bound on the per-run replay buffer.
pub const DEFAULT_HISTORY_CAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceEventKind {
    Iteration,
    Final,
    Error,
}

/// One event on a run's live trace stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "type")]
    pub kind: TraceEventKind,
    pub run_id: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct RunChannel {
    history: VecDeque<TraceEvent>,
    subscribers: Vec<mpsc::UnboundedSender<TraceEvent>>,
}

/// Per-run publish/subscribe broadcaster with bounded replay.
///
/// Transport-generic: a subscriber is any consumer of the returned receiver.
/// New subscribers get the full buffered history, in original order, before
/// any live event; the replay and the subscriber registration happen under
/// one lock so no publish can interleave them.
pub struct LiveTraceHub {
    runs: Mutex<HashMap<String, RunChannel>>,
    history_cap: usize,
}

impl LiveTraceHub {
    pub fn new(history_cap: usize) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            history_cap: history_cap.max(1),
        }
    }

    /// Subscribe to a run's stream, replaying buffered history first.
    ///
    /// Subscribing creates the run's channel if absent so events published
    /// afterwards are not lost; the channel lives until [`Self::clear`].
    /// Callers that cannot guarantee a matching `clear` should gate
    /// subscriptions on the run existing.
    pub fn subscribe(&self, run_id: &str) -> mpsc::UnboundedReceiver<TraceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut runs = self.runs.lock().unwrap();
        let channel = runs.entry(run_id.to_string()).or_default();
        for event in &channel.history {
            // A receiver dropped mid-replay just stops getting events.
            let _ = tx.send(event.clone());
        }
        channel.subscribers.push(tx);
        rx
    }

    /// Publish an event: buffer it (evicting the oldest past the cap) and
    /// broadcast to every live subscriber, pruning closed ones.
    pub fn publish(&self, run_id: &str, kind: TraceEventKind, payload: Value) -> TraceEvent {
        let event = TraceEvent {
            kind,
            run_id: run_id.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        let mut runs = self.runs.lock().unwrap();
        let channel = runs.entry(run_id.to_string()).or_default();
        channel.history.push_back(event.clone());
        while channel.history.len() > self.history_cap {
            channel.history.pop_front();
        }
        channel.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        event
    }

    /// Drop a run's history and subscriber set.
    pub fn clear(&self, run_id: &str) {
        let removed = self.runs.lock().unwrap().remove(run_id);
        if removed.is_some() {
            debug!(run_id = %run_id, "cleared live trace channel");
        }
    }

    /// Number of buffered events for a run.
    pub fn history_len(&self, run_id: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(|c| c.history.len())
            .unwrap_or(0)
    }
}

impl Default for LiveTraceHub {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_late_subscriber_gets_replay_in_order() {
        let hub = LiveTraceHub::default();
        for i in 0..5 {
            hub.publish("run-1", TraceEventKind::Iteration, json!({ "i": i }));
        }

        let mut rx = hub.subscribe("run-1");
        hub.publish("run-1", TraceEventKind::Final, json!({"done": true}));

        for i in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.kind, TraceEventKind::Iteration);
            assert_eq!(event.payload["i"], json!(i));
        }
        let live = rx.recv().await.unwrap();
        assert_eq!(live.kind, TraceEventKind::Final);
    }

    #[tokio::test]
    async fn test_history_eviction_beyond_cap() {
        let hub = LiveTraceHub::new(3);
        for i in 0..10 {
            hub.publish("run-1", TraceEventKind::Iteration, json!({ "i": i }));
        }
        assert_eq!(hub.history_len("run-1"), 3);

        let mut rx = hub.subscribe("run-1");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload["i"], json!(7));
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let hub = LiveTraceHub::default();
        let mut rx_a = hub.subscribe("run-a");
        let _rx_b = hub.subscribe("run-b");

        hub.publish("run-b", TraceEventKind::Iteration, json!({"n": 1}));
        hub.publish("run-a", TraceEventKind::Iteration, json!({"n": 2}));

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.run_id, "run-a");
        assert_eq!(event.payload["n"], json!(2));
    }

    #[tokio::test]
    async fn test_clear_drops_history_and_subscribers() {
        let hub = LiveTraceHub::default();
        let mut rx = hub.subscribe("run-1");
        hub.publish("run-1", TraceEventKind::Iteration, json!({}));
        assert!(rx.recv().await.is_some());

        hub.clear("run-1");
        assert_eq!(hub.history_len("run-1"), 0);

        // A publish after clear goes to a fresh channel the old receiver
        // is no longer attached to.
        hub.publish("run-1", TraceEventKind::Iteration, json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_pruned_on_publish() {
        let hub = LiveTraceHub::default();
        let rx = hub.subscribe("run-1");
        drop(rx);
        hub.publish("run-1", TraceEventKind::Iteration, json!({}));
        let runs = hub.runs.lock().unwrap();
        assert!(runs.get("run-1").unwrap().subscribers.is_empty());
    }
}
