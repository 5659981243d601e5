use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::{Severity, Violation, ViolationKind};

/// Default number of entries the rolling log keeps.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViolationLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub description: String,
    pub severity: Severity,
    /// People affected; 1 when the violation carries no count.
    pub count: u32,
}

impl ViolationLogEntry {
    pub fn from_violation(violation: &Violation, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind: violation.kind,
            description: violation.description.clone(),
            severity: violation.severity,
            count: violation.count.unwrap_or(1),
        }
    }
}

/// Bounded, append-only violation history. Oldest entries are evicted first.
#[derive(Debug)]
pub struct ViolationLog {
    entries: VecDeque<ViolationLogEntry>,
    capacity: usize,
    total: u64,
}

impl ViolationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    pub fn append(&mut self, entry: ViolationLogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.total += 1;
    }

    /// Append one entry per violation, all stamped with `timestamp`.
    pub fn record(&mut self, violations: &[Violation], timestamp: DateTime<Utc>) {
        for violation in violations {
            self.append(ViolationLogEntry::from_violation(violation, timestamp));
        }
    }

    /// Up to `limit` most recent entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ViolationLogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries ever appended, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for ViolationLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(n: u32, count: Option<u32>) -> Violation {
        Violation {
            kind: ViolationKind::MissingHardhat,
            severity: Severity::High,
            description: format!("violation {n}"),
            bbox: None,
            count,
            confidence: None,
        }
    }

    #[test]
    fn log_never_exceeds_capacity_and_evicts_oldest() {
        let mut log = ViolationLog::new(3);
        for n in 0..5 {
            log.record(&[violation(n, None)], Utc::now());
            assert!(log.len() <= 3);
        }
        let recent = log.recent(10);
        let descriptions: Vec<_> = recent.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(descriptions, ["violation 2", "violation 3", "violation 4"]);
        assert_eq!(log.total(), 5);
    }

    #[test]
    fn recent_returns_newest_last() {
        let mut log = ViolationLog::new(10);
        for n in 0..4 {
            log.record(&[violation(n, Some(n + 1))], Utc::now());
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].description, "violation 2");
        assert_eq!(recent[1].count, 4);
    }

    #[test]
    fn count_defaults_to_one() {
        let entry = ViolationLogEntry::from_violation(&violation(0, None), Utc::now());
        assert_eq!(entry.count, 1);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "missing_hardhat");
    }
}
