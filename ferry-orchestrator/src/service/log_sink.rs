//! Execution Log Sink
//!
//! Bounded, append-only log per build or deployment.
//!
//! The execution that owns a log is its only writer; status queries read it
//! concurrently. Total message bytes are capped, and once the cap is exceeded
//! the oldest entries are evicted. Entries are persisted through the
//! [`Store`] when the owner flushes at a stage boundary and on every tick of
//! the registry's flush loop, so other processes see output of a stage that
//! is still running. Reads fall back to the store once the execution has
//! closed its log.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ferry_core::domain::failure::truncate_message;
use ferry_core::domain::log::{LogEntry, LogLevel};
use uuid::Uuid;

use crate::repository::{Store, StoreResult};

/// Default byte cap of a single execution log
pub const DEFAULT_LOG_CAP_BYTES: usize = 1024 * 1024;

/// Live log of one execution
#[derive(Debug)]
pub struct ExecutionLog {
    execution_id: Uuid,
    cap_bytes: usize,
    state: RwLock<LogState>,
    /// Held across a flush so the owner and the flush loop never persist
    /// the same entries twice
    flushing: tokio::sync::Mutex<()>,
}

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<(u64, LogEntry)>,
    bytes: usize,
    next_seq: u64,
    /// Entries with a sequence number below this have been persisted
    flushed_seq: u64,
    evicted: u64,
}

impl ExecutionLog {
    pub fn new(execution_id: Uuid, cap_bytes: usize) -> Self {
        Self {
            execution_id,
            cap_bytes: cap_bytes.max(1),
            state: RwLock::new(LogState::default()),
            flushing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Appends an entry, evicting the oldest ones beyond the cap
    pub fn append(&self, level: LogLevel, message: impl AsRef<str>) {
        let message = truncate_message(message.as_ref(), self.cap_bytes);
        let entry = LogEntry::new(level, message);

        let mut state = self.write_state();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.bytes += entry.message.len();
        state.entries.push_back((seq, entry));

        while state.bytes > self.cap_bytes && state.entries.len() > 1 {
            if let Some((_, evicted)) = state.entries.pop_front() {
                state.bytes -= evicted.message.len();
                state.evicted += 1;
            }
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.append(LogLevel::Error, message);
    }

    /// Entries currently retained, preceded by an eviction marker if any
    /// entries were dropped
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let state = self.read_state();
        let mut entries = Vec::with_capacity(state.entries.len() + 1);

        if state.evicted > 0 {
            let timestamp = state
                .entries
                .front()
                .map(|(_, e)| e.timestamp)
                .unwrap_or_else(chrono::Utc::now);
            entries.push(eviction_marker(state.evicted, timestamp));
        }

        entries.extend(state.entries.iter().map(|(_, e)| e.clone()));
        entries
    }

    /// Entries not yet persisted and the sequence number to mark once they are
    fn unflushed(&self) -> (Vec<LogEntry>, u64) {
        let state = self.read_state();
        let pending = state
            .entries
            .iter()
            .filter(|(seq, _)| *seq >= state.flushed_seq)
            .map(|(_, e)| e.clone())
            .collect();
        (pending, state.next_seq)
    }

    fn mark_flushed(&self, upto: u64) {
        let mut state = self.write_state();
        if upto > state.flushed_seq {
            state.flushed_seq = upto;
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, LogState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, LogState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn eviction_marker(evicted: u64, timestamp: chrono::DateTime<chrono::Utc>) -> LogEntry {
    LogEntry {
        timestamp,
        level: LogLevel::Warning,
        message: format!("[{} earlier log entries evicted]", evicted),
    }
}

/// Live logs of the executions running in this process
pub struct LogRegistry {
    store: Arc<dyn Store>,
    cap_bytes: usize,
    live: RwLock<HashMap<Uuid, Arc<ExecutionLog>>>,
}

impl LogRegistry {
    pub fn new(store: Arc<dyn Store>, cap_bytes: usize) -> Self {
        Self {
            store,
            cap_bytes,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Opens the live log of an execution, reusing it if already open
    pub fn open(&self, execution_id: Uuid) -> Arc<ExecutionLog> {
        let mut live = self
            .live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        live.entry(execution_id)
            .or_insert_with(|| Arc::new(ExecutionLog::new(execution_id, self.cap_bytes)))
            .clone()
    }

    pub fn get(&self, execution_id: Uuid) -> Option<Arc<ExecutionLog>> {
        self.live
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&execution_id)
            .cloned()
    }

    /// Persists entries appended since the last flush
    ///
    /// A failed flush leaves the entries pending so the next flush retries.
    pub async fn flush(&self, log: &ExecutionLog) -> StoreResult<()> {
        let _flushing = log.flushing.lock().await;
        let (pending, upto) = log.unflushed();
        if pending.is_empty() {
            return Ok(());
        }

        self.store.append_logs(log.execution_id(), &pending).await?;
        log.mark_flushed(upto);
        Ok(())
    }

    /// Flushes every live log; returns how many flushes failed
    pub async fn flush_live(&self) -> usize {
        let live: Vec<Arc<ExecutionLog>> = self
            .live
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let mut failed = 0;
        for log in live {
            if let Err(e) = self.flush(&log).await {
                tracing::warn!("Failed to flush logs of {}: {}", log.execution_id(), e);
                failed += 1;
            }
        }
        failed
    }

    /// Flushes the live logs every `interval`; spawned once at startup
    pub async fn run_flusher(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.flush_live().await;
        }
    }

    /// Flushes `log` and drops it from the live set
    ///
    /// The live entry is only removed if it is still `log`, so an execution
    /// that reopened the same id keeps its buffer.
    pub async fn close(&self, log: &Arc<ExecutionLog>) {
        let execution_id = log.execution_id();

        if let Err(e) = self.flush(log).await {
            tracing::warn!("Failed to flush logs of {} on close: {}", execution_id, e);
        }

        let mut live = self
            .live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if live
            .get(&execution_id)
            .is_some_and(|current| Arc::ptr_eq(current, log))
        {
            live.remove(&execution_id);
        }
    }

    /// Reads an execution's log from the live buffer or, once closed, from
    /// the store, keeping the newest entries within the cap
    pub async fn read(&self, execution_id: Uuid) -> StoreResult<Vec<LogEntry>> {
        if let Some(log) = self.get(execution_id) {
            return Ok(log.snapshot());
        }

        let entries = self.store.list_logs(execution_id).await?;
        Ok(cap_entries(entries, self.cap_bytes))
    }
}

/// Keeps the newest entries whose messages fit in `cap_bytes`
fn cap_entries(entries: Vec<LogEntry>, cap_bytes: usize) -> Vec<LogEntry> {
    let mut bytes = 0usize;
    let mut keep = 0usize;

    for entry in entries.iter().rev() {
        if keep > 0 && bytes + entry.message.len() > cap_bytes {
            break;
        }
        bytes += entry.message.len();
        keep += 1;
    }

    let dropped = entries.len() - keep;
    let mut kept: Vec<LogEntry> = entries.into_iter().skip(dropped).collect();

    if dropped > 0 {
        let timestamp = kept
            .first()
            .map(|e| e.timestamp)
            .unwrap_or_else(chrono::Utc::now);
        kept.insert(0, eviction_marker(dropped as u64, timestamp));
    }

    kept
}
