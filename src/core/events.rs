//! Lifecycle events exposed to external distributors.
//!
//! The engine emits one ordered stream of events per execution through an
//! [`EventEmitter`]. Buffering, batching, and backpressure policy belong to
//! the consumer; the emitter only skips work cheaply when nobody listens.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone, Debug, Serialize)]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: String,
        diagram_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: String,
        node_id: String,
        dispatch: u32,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: String,
        node_id: String,
        output: Value,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Log {
        execution_id: String,
        node_id: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCompleted {
        execution_id: String,
        outputs: HashMap<String, Value>,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Sender wrapper for lifecycle events, with an atomic active flag so that
/// event emission can be cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::Sender<ExecutionEvent>>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<ExecutionEvent>) -> Self {
        EventEmitter {
            tx: Some(tx),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// An emitter that drops everything.
    pub fn disabled() -> Self {
        EventEmitter {
            tx: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn emit(&self, event: ExecutionEvent) {
        if !self.is_active() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                // Receiver is gone; stop paying for sends.
                self.active.store(false, Ordering::Relaxed);
            }
        }
    }
}

/// Create a bounded event channel and its emitter.
pub fn event_channel(capacity: usize) -> (EventEmitter, mpsc::Receiver<ExecutionEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventEmitter::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let (emitter, mut rx) = event_channel(8);
        emitter
            .emit(ExecutionEvent::ExecutionStarted {
                execution_id: "e1".into(),
                diagram_id: "d1".into(),
                timestamp: Utc::now(),
            })
            .await;

        match rx.recv().await.unwrap() {
            ExecutionEvent::ExecutionStarted { execution_id, .. } => {
                assert_eq!(execution_id, "e1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_emitter_is_noop() {
        let emitter = EventEmitter::disabled();
        assert!(!emitter.is_active());
        emitter
            .emit(ExecutionEvent::Log {
                execution_id: "e1".into(),
                node_id: None,
                message: "dropped".into(),
                timestamp: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_emitter_deactivates_after_rx_drop() {
        let (emitter, rx) = event_channel(1);
        drop(rx);
        emitter
            .emit(ExecutionEvent::Log {
                execution_id: "e1".into(),
                node_id: None,
                message: "x".into(),
                timestamp: Utc::now(),
            })
            .await;
        assert!(!emitter.is_active());
    }
}
