//! Journals: bounded rings of recent exchanges and of diff-mode findings.
//!
//! Both rings evict the oldest entry on overflow and serve reads as a
//! snapshot copy, so an admin poll never observes a half-written entry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::modes::Mode;
use crate::simulation::{RequestView, ResponseView};

/// One completed exchange.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub request: RequestView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_response: Option<ResponseView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_response: Option<ResponseView>,
    pub mode: Mode,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
    /// Short summary of the matching outcome, when matching ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matching_result: Option<String>,
}

#[derive(Debug)]
pub struct Journal {
    entries: Mutex<VecDeque<JournalEntry>>,
    capacity: usize,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Journal {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, entry: JournalEntry) {
        let mut entries = self.entries.lock().expect("journal poisoned");
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().expect("journal poisoned").iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("journal poisoned").clear();
    }
}

/// One field that differed between the upstream response and the matched
/// simulated response.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

/// Diff-mode findings for one request.
#[derive(Debug, Clone, Serialize)]
pub struct DiffEntry {
    pub request: RequestView,
    pub diffs: Vec<FieldDiff>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DiffJournal {
    entries: Mutex<VecDeque<DiffEntry>>,
    capacity: usize,
}

impl DiffJournal {
    pub fn new(capacity: usize) -> Self {
        DiffJournal {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, entry: DiffEntry) {
        let mut entries = self.entries.lock().expect("diff journal poisoned");
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<DiffEntry> {
        self.entries.lock().expect("diff journal poisoned").iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("diff journal poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{ParsedRequest, Scheme};

    fn entry(path: &str) -> JournalEntry {
        let request = ParsedRequest::new("GET", Scheme::Http, "example.com", path);
        JournalEntry {
            request: RequestView::from_request(&request),
            matched_response: None,
            upstream_response: None,
            mode: Mode::Simulate,
            latency: Duration::from_millis(3),
            timestamp: Utc::now(),
            matching_result: None,
        }
    }

    #[test]
    fn overflow_evicts_oldest() {
        let journal = Journal::new(2);
        journal.record(entry("/one"));
        journal.record(entry("/two"));
        journal.record(entry("/three"));

        let paths: Vec<String> = journal.entries().into_iter().map(|e| e.request.path).collect();
        assert_eq!(paths, vec!["/two", "/three"]);
    }

    #[test]
    fn reads_are_snapshots() {
        let journal = Journal::new(8);
        journal.record(entry("/one"));
        let snapshot = journal.entries();
        journal.record(entry("/two"));
        assert_eq!(snapshot.len(), 1);
    }
}
