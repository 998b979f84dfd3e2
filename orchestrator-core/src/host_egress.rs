//! Host Egress: a thin, always-safe boundary to the window/UI host's
//! `send(channel, payload)` primitive. Every write is guarded so a
//! torn-down or never-attached host can never panic the control loop, and
//! a newly-attached sink never receives a replay of messages sent while it
//! was absent.

use std::sync::{Arc, RwLock};

use serde::Serialize;

/// The host's message sink: a `send(channel, payload)` primitive and a
/// `destroyed` predicate. Implemented by the UI host, which is out of
/// scope for this crate.
pub trait HostSink: Send + Sync {
    fn send(&self, channel: &str, payload: serde_json::Value);
    fn is_destroyed(&self) -> bool;
}

pub mod channel {
    pub const CODE_EXECUTION_RESULT: &str = "code-execution-result";
    pub const INPUT_REQUEST_SCRIPTED: &str = "input-request-scripted";
    pub const INPUT_REQUEST_INTERPRETED: &str = "input-request-interpreted";
    /// Orchestrator diagnostics, not user output.
    pub const LOG_ENTRY: &str = "log-entry";
}

#[derive(Default)]
pub struct HostEgress {
    sink: RwLock<Option<Arc<dyn HostSink>>>,
}

impl HostEgress {
    pub fn new() -> Self {
        Self {
            sink: RwLock::new(None),
        }
    }

    /// `setHostSink(sink | null)`.
    pub fn set_sink(&self, sink: Option<Arc<dyn HostSink>>) {
        *self.sink.write().expect("host egress lock poisoned") = sink;
    }

    /// Serializes `payload` and forwards it on `channel`; silently drops it
    /// if there's no sink or the sink reports `destroyed`.
    pub fn send(&self, channel: &str, payload: impl Serialize) {
        let guard = self.sink.read().expect("host egress lock poisoned");
        let Some(sink) = guard.as_ref() else {
            return;
        };
        if sink.is_destroyed() {
            return;
        }
        match serde_json::to_value(payload) {
            Ok(value) => sink.send(channel, value),
            Err(error) => {
                tracing::error!(%error, channel, "failed to serialize host egress payload");
            }
        }
    }

    pub fn has_sink(&self) -> bool {
        self.sink
            .read()
            .expect("host egress lock poisoned")
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct RecordingSink {
        destroyed: AtomicBool,
        count: AtomicUsize,
    }

    impl HostSink for RecordingSink {
        fn send(&self, _channel: &str, _payload: serde_json::Value) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }

        fn is_destroyed(&self) -> bool {
            self.destroyed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn send_without_sink_is_a_silent_no_op() {
        let egress = HostEgress::new();
        egress.send(channel::LOG_ENTRY, serde_json::json!({"ok": true}));
    }

    #[test]
    fn send_to_destroyed_sink_is_dropped() {
        let sink = Arc::new(RecordingSink {
            destroyed: AtomicBool::new(true),
            count: AtomicUsize::new(0),
        });
        let egress = HostEgress::new();
        egress.set_sink(Some(sink.clone()));
        egress.send(channel::LOG_ENTRY, serde_json::json!({}));
        assert_eq!(sink.count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reattaching_a_sink_does_not_replay() {
        let first = Arc::new(RecordingSink {
            destroyed: AtomicBool::new(false),
            count: AtomicUsize::new(0),
        });
        let egress = HostEgress::new();
        egress.set_sink(Some(first.clone()));
        egress.send(channel::LOG_ENTRY, serde_json::json!({}));
        assert_eq!(first.count.load(Ordering::SeqCst), 1);

        let second = Arc::new(RecordingSink {
            destroyed: AtomicBool::new(false),
            count: AtomicUsize::new(0),
        });
        egress.set_sink(Some(second.clone()));
        assert_eq!(second.count.load(Ordering::SeqCst), 0);
    }
}
