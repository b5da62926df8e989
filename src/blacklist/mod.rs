//! Blocked-number set consulted before a call is admitted.
//!
//! Membership is an exact string match. Callers normalise numbers before
//! insertion and query; the guard does not.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: String,
    pub phone_number: String,
    pub reason: String,
    pub date_added: DateTime<Utc>,
}

/// Outcome of [`BlacklistGuard::add`]. A duplicate number is reported, not
/// inserted twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(BlacklistEntry),
    AlreadyPresent,
}

#[derive(Default)]
pub struct BlacklistGuard {
    entries: Mutex<Vec<BlacklistEntry>>,
}

impl BlacklistGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, phone_number: &str) -> bool {
        self.entries
            .lock()
            .expect("blacklist lock poisoned")
            .iter()
            .any(|entry| entry.phone_number == phone_number)
    }

    pub fn add(&self, phone_number: &str, reason: &str) -> AddOutcome {
        let mut entries = self.entries.lock().expect("blacklist lock poisoned");
        if entries
            .iter()
            .any(|entry| entry.phone_number == phone_number)
        {
            return AddOutcome::AlreadyPresent;
        }

        let entry = BlacklistEntry {
            id: Uuid::new_v4().to_string(),
            phone_number: phone_number.to_string(),
            reason: reason.to_string(),
            date_added: Utc::now(),
        };
        entries.push(entry.clone());
        AddOutcome::Added(entry)
    }

    /// Removes by entry id. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().expect("blacklist lock poisoned");
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("blacklist lock poisoned")
            .clear();
    }

    pub fn list(&self) -> Vec<BlacklistEntry> {
        self.entries
            .lock()
            .expect("blacklist lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_query_is_blocked() {
        let guard = BlacklistGuard::new();
        assert!(!guard.is_blocked("+15555550100"));

        let outcome = guard.add("+15555550100", "news service");
        assert!(matches!(outcome, AddOutcome::Added(_)));
        assert!(guard.is_blocked("+15555550100"));
    }

    #[test]
    fn duplicate_number_is_reported_not_inserted() {
        let guard = BlacklistGuard::new();
        guard.add("+15555550100", "news service");

        assert_eq!(
            guard.add("+15555550100", "different reason"),
            AddOutcome::AlreadyPresent
        );
        assert_eq!(guard.list().len(), 1);
    }

    #[test]
    fn membership_is_exact_string_match() {
        let guard = BlacklistGuard::new();
        guard.add("+1 (555) 555-0100", "automated system");

        assert!(guard.is_blocked("+1 (555) 555-0100"));
        // Same number, different formatting: not a match by contract.
        assert!(!guard.is_blocked("+15555550100"));
    }

    #[test]
    fn remove_by_id_is_unconditional() {
        let guard = BlacklistGuard::new();
        let entry = match guard.add("+15555550100", "spam") {
            AddOutcome::Added(entry) => entry,
            AddOutcome::AlreadyPresent => panic!("fresh guard cannot have duplicates"),
        };

        assert!(guard.remove(&entry.id));
        assert!(!guard.is_blocked("+15555550100"));
        assert!(!guard.remove(&entry.id));
    }

    #[test]
    fn clear_empties_the_set() {
        let guard = BlacklistGuard::new();
        guard.add("+15555550100", "spam");
        guard.add("+15555550101", "spam");

        guard.clear();
        assert!(guard.list().is_empty());
        assert!(!guard.is_blocked("+15555550100"));
    }
}
