//! Append-only record of canonical entries, keyed by step

use crate::types::{CanonicalEntry, Step};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// In-memory replay log. Persisting it is left to the caller.
#[derive(Debug, Default)]
pub struct ReplayLog {
    entries: Mutex<BTreeMap<Step, CanonicalEntry>>,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized entry. An entry for an already recorded step is ignored.
    pub fn record(&self, entry: &CanonicalEntry) {
        let mut entries = self.entries.lock();
        if entries.contains_key(&entry.step) {
            tracing::warn!("Replay log already holds step {}, ignoring", entry.step);
            return;
        }
        entries.insert(entry.step, entry.clone());
    }

    pub fn get(&self, step: Step) -> Option<CanonicalEntry> {
        self.entries.lock().get(&step).cloned()
    }

    /// Every recorded entry in step order
    pub fn entries(&self) -> Vec<CanonicalEntry> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: Step) -> CanonicalEntry {
        CanonicalEntry {
            step,
            contributions: Vec::new(),
        }
    }

    #[test]
    fn test_entries_come_back_in_step_order() {
        let log = ReplayLog::new();
        log.record(&entry(3));
        log.record(&entry(1));
        log.record(&entry(2));

        let steps: Vec<_> = log.entries().iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[test]
    fn test_record_is_append_only() {
        let log = ReplayLog::new();
        log.record(&entry(1));
        let mut replacement = entry(1);
        replacement.contributions.push(crate::types::Contribution {
            participant: crate::types::ParticipantId(1),
            batch: Default::default(),
        });
        log.record(&replacement);

        assert_eq!(log.len(), 1);
        assert!(log.get(1).unwrap().contributions.is_empty());
    }
}
