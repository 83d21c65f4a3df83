//! Cancellation signals
//!
//! Each running build or deployment owns a [`CancelSignal`]. The registry maps
//! execution ids to their signal so that a cancel request arriving over HTTP
//! can reach the task running the execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use uuid::Uuid;

/// Cloneable, one-shot cancellation flag
///
/// Adapters race their child processes against [`CancelSignal::cancelled`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Whether both handles belong to the same signal
    pub fn same_as(&self, other: &CancelSignal) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    /// Resolves once the signal has fired
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Signals of the executions currently running in this process
#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    running: Mutex<HashMap<Uuid, CancelSignal>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh signal for an execution
    pub fn register(&self, execution_id: Uuid) -> CancelSignal {
        let signal = CancelSignal::new();
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(execution_id, signal.clone());
        signal
    }

    /// Drops the entry for an execution if it still holds `signal`
    pub fn unregister(&self, execution_id: Uuid, signal: &CancelSignal) {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if running
            .get(&execution_id)
            .is_some_and(|current| current.same_as(signal))
        {
            running.remove(&execution_id);
        }
    }

    /// Fires the signal of a running execution; false when nothing is running
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match running.get(&execution_id) {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of every execution currently registered
    pub fn running_ids(&self) -> Vec<Uuid> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect()
    }

    pub fn is_running(&self, execution_id: Uuid) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&execution_id)
    }
}
