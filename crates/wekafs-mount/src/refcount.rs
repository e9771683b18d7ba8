//! Concurrent reference-count table.
//!
//! [`RefCountTable`] maps a key to a shared [`RefEntry`]. Each entry carries
//! its own async lock, so mount and unmount work on one key never blocks
//! work on another. The table itself is a [`DashMap`] and is only held for
//! the lookup or insert, never across an `.await`.
//!
//! # Retirement
//!
//! Garbage collection removes idle entries. Removal happens while holding
//! the entry's lock with the count at zero, and marks the entry retired. A
//! caller that looked the entry up before removal and then acquires its lock
//! sees the retired flag and must look the key up again, which yields a fresh
//! entry. No caller ever increments a count on an entry that is no longer in
//! the table.
//!
//! # Example
//!
//! ```
//! use wekafs_mount::RefCountTable;
//!
//! # tokio_test_block_on(async {
//! let table: RefCountTable<&str> = RefCountTable::new();
//! let entry = table.get_or_insert_with("k", || "value");
//! {
//!     let mut guard = entry.lock().await;
//!     assert_eq!(guard.increment(), 1);
//! }
//! assert_eq!(table.active_count(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A reference-counted value with a per-entry async lock.
#[derive(Debug)]
pub struct RefEntry<T> {
    key: String,
    value: T,
    count: AtomicI64,
    lock: tokio::sync::Mutex<()>,
    retired: AtomicBool,
    last_used: parking_lot::Mutex<Instant>,
}

impl<T> RefEntry<T> {
    fn new(key: String, value: T) -> Self {
        Self {
            key,
            value,
            count: AtomicI64::new(0),
            lock: tokio::sync::Mutex::new(()),
            retired: AtomicBool::new(false),
            last_used: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Current count. Lock-free snapshot for diagnostics; only meaningful
    /// for decisions when read through an [`EntryGuard`].
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// Whether garbage collection has removed this entry from its table.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    /// Acquire the entry's lock. Counts change only while it is held.
    pub async fn lock(&self) -> EntryGuard<'_, T> {
        let guard = self.lock.lock().await;
        EntryGuard {
            entry: self,
            _guard: guard,
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

/// Exclusive access to an entry's count.
pub struct EntryGuard<'a, T> {
    entry: &'a RefEntry<T>,
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

impl<T> EntryGuard<'_, T> {
    pub fn count(&self) -> i64 {
        self.entry.count.load(Ordering::Acquire)
    }

    pub fn is_retired(&self) -> bool {
        self.entry.is_retired()
    }

    /// Increment and return the new count.
    pub fn increment(&mut self) -> i64 {
        self.entry.touch();
        self.entry.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement and return the new count, or `Err(previous)` if the count
    /// was already zero or negative. On `Err` the count is clamped to zero.
    pub fn decrement(&mut self) -> Result<i64, i64> {
        self.entry.touch();
        let current = self.count();
        if current <= 0 {
            self.entry.count.store(0, Ordering::Release);
            return Err(current);
        }
        self.entry.count.store(current - 1, Ordering::Release);
        Ok(current - 1)
    }

    /// Overwrite the count, used to restore state after a failed unmount.
    pub fn set(&mut self, count: i64) {
        self.entry.count.store(count, Ordering::Release);
    }
}

/// Snapshot of one table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub key: String,
    pub count: i64,
    /// When the count last changed.
    pub last_used: Instant,
}

/// Key to [`RefEntry`] map safe for concurrent use from many tasks.
#[derive(Debug)]
pub struct RefCountTable<T> {
    entries: DashMap<String, Arc<RefEntry<T>>>,
}

impl<T> Default for RefCountTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefCountTable<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the live entry for `key`, creating it with `make` if absent.
    ///
    /// `make` runs at most once per call and only when the key is missing.
    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> T) -> Arc<RefEntry<T>> {
        if let Some(existing) = self.entries.get(key) {
            return Arc::clone(existing.value());
        }
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(RefEntry::new(key.to_string(), make()));
                vacant.insert(Arc::clone(&entry));
                entry
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<RefEntry<T>>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with a positive count.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value().count() > 0).count()
    }

    /// Every live entry, cloned out so callers can await on them freely.
    pub fn entries(&self) -> Vec<Arc<RefEntry<T>>> {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Key and count of every entry, sorted by key.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let mut out: Vec<EntrySnapshot> = self
            .entries
            .iter()
            .map(|e| EntrySnapshot {
                key: e.key().clone(),
                count: e.value().count(),
                last_used: e.value().last_used(),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Remove every entry whose count is zero and whose lock is free.
    ///
    /// Entries whose lock is held are skipped; they are either mid-operation
    /// or about to be reused. Returns the removed keys.
    pub fn prune_idle(&self) -> Vec<String> {
        let mut removed = Vec::new();
        for entry in self.entries() {
            let Ok(_guard) = entry.lock.try_lock() else {
                continue;
            };
            if entry.count() != 0 {
                continue;
            }
            entry.retired.store(true, Ordering::Release);
            if self
                .entries
                .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, &entry))
                .is_some()
            {
                removed.push(entry.key().to_string());
            }
        }
        removed
    }
}
