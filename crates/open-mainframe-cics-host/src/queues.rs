//! Transient data queues, START requests and spool output.
//!
//! All three are region-wide and in memory. TD queues are keyed by the
//! resolved destination id; an intrapartition queue whose depth reaches its
//! trigger level asks for its transaction to be started once, and re-arms
//! when drained.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::registry::{DestinationEntry, DestinationKind};

/// One transient data queue.
#[derive(Debug, Clone)]
pub struct TdQueue {
    id: String,
    kind: DestinationKind,
    records: VecDeque<Vec<u8>>,
    trigger_level: usize,
    transaction: Option<String>,
    triggered: bool,
}

impl TdQueue {
    fn new(entry: &DestinationEntry) -> Self {
        Self {
            id: entry.id.to_uppercase(),
            kind: entry.kind,
            records: VecDeque::new(),
            trigger_level: entry.trigger_level,
            transaction: entry.transaction.clone(),
            triggered: false,
        }
    }

    /// Append a record. Returns the transaction to start when the trigger
    /// level is reached.
    fn write(&mut self, data: Vec<u8>) -> Option<String> {
        self.records.push_back(data);
        if self.kind != DestinationKind::Intra
            || self.triggered
            || self.trigger_level == 0
            || self.records.len() < self.trigger_level
        {
            return None;
        }
        self.triggered = true;
        self.transaction.clone()
    }

    fn read(&mut self) -> Option<Vec<u8>> {
        let record = self.records.pop_front();
        if self.records.is_empty() {
            self.triggered = false;
        }
        record
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn depth(&self) -> usize {
        self.records.len()
    }
}

/// Region TD queues.
#[derive(Debug, Default)]
pub struct TdQueueManager {
    queues: DashMap<String, TdQueue>,
}

impl TdQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// WRITEQ TD to a resolved destination. Returns the transaction to start
    /// when this write reached the trigger level.
    pub fn write(&self, entry: &DestinationEntry, data: Vec<u8>) -> Option<String> {
        let key = entry.id.to_uppercase();
        let mut queue = self
            .queues
            .entry(key)
            .or_insert_with(|| TdQueue::new(entry));
        let trigger = queue.write(data);
        debug!(queue = %queue.id, depth = queue.depth(), "WRITEQ TD");
        trigger
    }

    /// READQ TD (destructive). `None` when the queue is empty.
    pub fn read(&self, entry: &DestinationEntry) -> Option<Vec<u8>> {
        self.queues
            .get_mut(&entry.id.to_uppercase())
            .and_then(|mut queue| queue.read())
    }

    pub fn depth(&self, dest: &str) -> usize {
        self.queues
            .get(&dest.trim().to_uppercase())
            .map(|queue| queue.depth())
            .unwrap_or(0)
    }
}

/// A queued START.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub transid: String,
    pub data: Vec<u8>,
    /// Terminal of the requesting session
    pub terminal_id: String,
    pub user_id: String,
    pub requested_at: NaiveDateTime,
}

/// FIFO of START requests waiting for the host to run them.
#[derive(Debug, Default)]
pub struct StartQueue {
    pending: Mutex<VecDeque<StartRequest>>,
}

impl StartQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<StartRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, request: StartRequest) {
        info!(transid = %request.transid, terminal = %request.terminal_id, "START queued");
        self.guard().push_back(request);
    }

    /// Take every pending request, oldest first.
    pub fn drain(&self) -> Vec<StartRequest> {
        self.guard().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

/// A closed spool file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolFile {
    pub token: String,
    pub user_id: String,
    pub class: char,
    pub lines: Vec<String>,
}

/// Receives spool files as sessions close them.
#[derive(Debug, Default)]
pub struct SpoolSink {
    closed: Mutex<Vec<SpoolFile>>,
}

impl SpoolSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<SpoolFile>> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn submit(&self, file: SpoolFile) {
        info!(token = %file.token, lines = file.lines.len(), class = %file.class, "Spool file closed");
        self.guard().push(file);
    }

    /// Take every closed spool file.
    pub fn drain(&self) -> Vec<SpoolFile> {
        std::mem::take(&mut *self.guard())
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_read() {
        let manager = TdQueueManager::new();
        let entry = DestinationEntry::intra("CSSL");
        manager.write(&entry, b"first".to_vec());
        manager.write(&entry, b"second".to_vec());
        assert_eq!(manager.depth("CSSL"), 2);
        assert_eq!(manager.read(&entry).unwrap(), b"first");
        assert_eq!(manager.read(&entry).unwrap(), b"second");
        assert!(manager.read(&entry).is_none());
    }

    #[test]
    fn test_trigger_fires_once_until_drained() {
        let manager = TdQueueManager::new();
        let entry = DestinationEntry::intra("PRTQ").with_trigger("PRNT", 2);
        assert_eq!(manager.write(&entry, b"1".to_vec()), None);
        assert_eq!(manager.write(&entry, b"2".to_vec()), Some("PRNT".to_string()));
        assert_eq!(manager.write(&entry, b"3".to_vec()), None);

        while manager.read(&entry).is_some() {}
        manager.write(&entry, b"4".to_vec());
        assert_eq!(manager.write(&entry, b"5".to_vec()), Some("PRNT".to_string()));
    }

    #[test]
    fn test_extrapartition_never_triggers() {
        let manager = TdQueueManager::new();
        let entry = DestinationEntry::extra("LOGX").with_trigger("PRNT", 1);
        assert_eq!(manager.write(&entry, b"line".to_vec()), None);
    }

    #[test]
    fn test_spool_sink_drain() {
        let sink = SpoolSink::new();
        sink.submit(SpoolFile {
            token: "SPOOL001".into(),
            user_id: "ALICE".into(),
            class: 'A',
            lines: vec!["REPORT".into()],
        });
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.drain().len(), 1);
        assert!(sink.is_empty());
    }
}
