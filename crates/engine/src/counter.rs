// In crates/engine/src/counter.rs

use core_types::Symbol;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Rows written per instrument plus a running total, shared by all writers.
#[derive(Debug)]
pub struct InsertCounter {
    per_key: RwLock<HashMap<Symbol, Arc<AtomicU64>>>,
    total: AtomicU64,
    progress_every: u64,
}

impl InsertCounter {
    pub fn new(progress_every: u64) -> Self {
        Self {
            per_key: RwLock::new(HashMap::new()),
            total: AtomicU64::new(0),
            progress_every: progress_every.max(1),
        }
    }

    fn slot(&self, key: &Symbol) -> Arc<AtomicU64> {
        {
            let map = self.per_key.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = map.get(key) {
                return slot.clone();
            }
        }
        let mut map = self.per_key.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.clone()).or_default().clone()
    }

    /// Attributes `rows` inserted rows to `key`.
    pub fn record(&self, key: &Symbol, rows: u64) {
        self.slot(key).fetch_add(rows, Ordering::Relaxed);
    }

    /// Adds to the running total and returns the new value. Logs progress each
    /// time the total crosses a multiple of `progress_every`.
    pub fn add_total(&self, rows: u64) -> u64 {
        let before = self.total.fetch_add(rows, Ordering::Relaxed);
        let after = before + rows;
        if crossed_mark(before, after, self.progress_every) {
            info!(total = after, "Bulk writer progress.");
        }
        after
    }

    pub fn get(&self, key: &Symbol) -> u64 {
        self.per_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|slot| slot.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HashMap<Symbol, u64> {
        self.per_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, slot)| (key.clone(), slot.load(Ordering::Relaxed)))
            .collect()
    }
}

fn crossed_mark(before: u64, after: u64, every: u64) -> bool {
    after / every > before / every
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn progress_marks() {
        assert!(!crossed_mark(0, 999, 1000));
        assert!(crossed_mark(999, 1000, 1000));
        assert!(crossed_mark(500, 2500, 1000));
        assert!(!crossed_mark(1000, 1999, 1000));
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let counter = Arc::new(InsertCounter::new(100));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let counter = counter.clone();
                thread::spawn(move || {
                    let key = Symbol::new(if i % 2 == 0 { "A" } else { "B" });
                    for _ in 0..1000 {
                        counter.record(&key, 1);
                        counter.add_total(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get(&Symbol::from("A")), 4000);
        assert_eq!(counter.get(&Symbol::from("B")), 4000);
        assert_eq!(counter.total(), 8000);
        assert_eq!(counter.snapshot().len(), 2);
    }

    #[test]
    fn unknown_key_reads_zero() {
        let counter = InsertCounter::new(10);
        assert_eq!(counter.get(&Symbol::from("NONE")), 0);
        assert!(counter.snapshot().is_empty());
    }
}
