//! Once-per-day attendance guard.
//!
//! Each identity is `NotMarked` until its first mark of the day and
//! `Marked` from then until the date changes. Rollover installs a fresh
//! [`DailyLedger`]; nothing is ever removed from a live one.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Identities already marked present on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyLedger {
    date: NaiveDate,
    marked: HashSet<String>,
}

impl DailyLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            marked: HashSet::new(),
        }
    }

    /// Seed a ledger with marks that already exist in the store.
    pub fn with_marks<I, S>(date: NaiveDate, marked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            date,
            marked: marked.into_iter().map(Into::into).collect(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }

    pub fn may_mark(&self, identity_id: &str) -> bool {
        !self.marked.contains(identity_id)
    }

    /// Returns `true` if this call moved the identity to `Marked`.
    /// A repeat call is a no-op.
    pub fn record_mark(&mut self, identity_id: &str) -> bool {
        if self.marked.contains(identity_id) {
            return false;
        }
        self.marked.insert(identity_id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkDecision {
    /// The commit ran and the identity is now marked.
    Marked,
    /// Already marked today; the commit was not run.
    AlreadyMarked,
}

/// Shared, lock-protected [`DailyLedger`].
///
/// [`LedgerGuard::mark_with`] is the only way the recognition loop marks an
/// identity: the membership check, the persisting commit, and the insert
/// happen under one lock, so concurrent probes resolving to the same
/// identity yield one mark.
#[derive(Debug)]
pub struct LedgerGuard {
    inner: Mutex<DailyLedger>,
}

impl LedgerGuard {
    pub fn new(ledger: DailyLedger) -> Self {
        Self {
            inner: Mutex::new(ledger),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DailyLedger> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn date(&self) -> NaiveDate {
        self.lock().date()
    }

    pub fn marked_count(&self) -> usize {
        self.lock().len()
    }

    pub fn may_mark(&self, identity_id: &str) -> bool {
        self.lock().may_mark(identity_id)
    }

    pub fn record_mark(&self, identity_id: &str) -> bool {
        self.lock().record_mark(identity_id)
    }

    /// Atomic check-and-set.
    ///
    /// If `identity_id` is not yet marked, runs `commit` while holding the
    /// lock and records the mark only if it succeeds. A failed commit leaves
    /// the ledger untouched and its error is returned.
    pub fn mark_with<E, F>(&self, identity_id: &str, commit: F) -> Result<MarkDecision, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let mut ledger = self.lock();
        if !ledger.may_mark(identity_id) {
            return Ok(MarkDecision::AlreadyMarked);
        }
        commit()?;
        ledger.record_mark(identity_id);
        Ok(MarkDecision::Marked)
    }

    /// Swap in the ledger for a new date. Returns the previous date.
    pub fn roll_over(&self, next: DailyLedger) -> NaiveDate {
        let mut ledger = self.lock();
        let previous = ledger.date();
        *ledger = next;
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn d1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 2).unwrap()
    }

    fn d2() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 3).unwrap()
    }

    #[test]
    fn test_record_mark_is_idempotent() {
        let mut ledger = DailyLedger::new(d1());
        assert!(ledger.may_mark("S1"));
        assert!(ledger.record_mark("S1"));
        assert!(!ledger.may_mark("S1"));
        assert!(!ledger.record_mark("S1"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_seeded_ledger_blocks_existing_marks() {
        let ledger = DailyLedger::with_marks(d1(), ["S1", "S2"]);
        assert!(!ledger.may_mark("S1"));
        assert!(!ledger.may_mark("S2"));
        assert!(ledger.may_mark("S3"));
    }

    #[test]
    fn test_rollover_resets_marks() {
        let guard = LedgerGuard::new(DailyLedger::new(d1()));
        guard.record_mark("S1");
        assert!(!guard.may_mark("S1"));

        let previous = guard.roll_over(DailyLedger::new(d2()));
        assert_eq!(previous, d1());
        assert_eq!(guard.date(), d2());
        assert!(guard.may_mark("S1"));
        assert_eq!(guard.marked_count(), 0);
    }

    #[test]
    fn test_failed_commit_leaves_identity_unmarked() {
        let guard = LedgerGuard::new(DailyLedger::new(d1()));
        let result: Result<MarkDecision, &str> = guard.mark_with("S1", || Err("disk full"));
        assert_eq!(result, Err("disk full"));
        assert!(guard.may_mark("S1"));

        let result: Result<MarkDecision, &str> = guard.mark_with("S1", || Ok(()));
        assert_eq!(result, Ok(MarkDecision::Marked));
        assert!(!guard.may_mark("S1"));
    }

    #[test]
    fn test_commit_skipped_when_already_marked() {
        let guard = LedgerGuard::new(DailyLedger::with_marks(d1(), ["S1"]));
        let mut ran = false;
        let result: Result<_, ()> = guard.mark_with("S1", || {
            ran = true;
            Ok(())
        });
        assert_eq!(result, Ok(MarkDecision::AlreadyMarked));
        assert!(!ran);
    }

    #[test]
    fn test_concurrent_marks_commit_once() {
        const PROBES: usize = 16;
        let guard = Arc::new(LedgerGuard::new(DailyLedger::new(d1())));
        let commits = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(PROBES));

        let handles: Vec<_> = (0..PROBES)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let commits = Arc::clone(&commits);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    guard
                        .mark_with::<(), _>("S1", || {
                            commits.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();

        let decisions: Vec<MarkDecision> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(
            decisions.iter().filter(|d| **d == MarkDecision::Marked).count(),
            1
        );
    }
}
