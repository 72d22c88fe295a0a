//! Lock registry: one [`FileLock`] per file name
//!
//! Lookups go through a sharded concurrent map and never take the
//! registry-wide mutex. Only a miss does: the creation mutex is taken, the map
//! is checked again (another session may have just inserted), and the lock is
//! created if still absent. Two sessions resolving the same new name always
//! end up sharing one lock.
//!
//! Entries are pruned according to [`Eviction`]. An entry is removed only
//! while the registry holds the sole reference to its lock, and removal runs
//! under the creation mutex, so a name never has two live locks.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use depot_core::{Eviction, LockConfig};

use crate::lock::{FileLock, LockStatus};

/// Shared map of name → lock, owned by the server and handed to every session
pub struct LockRegistry {
    entries: DashMap<String, Arc<FileLock>>,
    create: Mutex<()>,
    config: LockConfig,
}

impl LockRegistry {
    pub fn new(config: LockConfig) -> Self {
        Self {
            entries: DashMap::new(),
            create: Mutex::new(()),
            config,
        }
    }

    /// Get the lock for `name`, creating it on first use
    pub fn resolve(&self, name: &str) -> Arc<FileLock> {
        if let Some(lock) = self.entries.get(name) {
            return Arc::clone(lock.value());
        }

        let _create = self.create.lock();
        if let Some(lock) = self.entries.get(name) {
            return Arc::clone(lock.value());
        }

        let lock = Arc::new(FileLock::new(name, self.config.fairness));
        self.entries.insert(name.to_string(), Arc::clone(&lock));
        debug!(name, entries = self.entries.len(), "lock entry created");
        lock
    }

    /// Drop the entry for `name` if nobody references its lock.
    ///
    /// No-op under [`Eviction::Retain`]. Returns whether an entry was removed.
    pub fn evict_if_idle(&self, name: &str) -> bool {
        if self.config.eviction == Eviction::Retain {
            return false;
        }

        let _create = self.create.lock();
        let removed = self
            .entries
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1)
            .is_some();
        if removed {
            debug!(name, "lock entry evicted");
        }
        removed
    }

    /// Drop every entry nobody references. Returns how many were removed.
    pub fn prune(&self) -> usize {
        if self.config.eviction == Eviction::Retain {
            return 0;
        }

        let _create = self.create.lock();
        let before = self.entries.len();
        self.entries.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "pruned idle lock entries");
        }
        removed
    }

    /// Status of the lock for `name` without creating an entry
    pub fn status(&self, name: &str) -> LockStatus {
        self.entries
            .get(name)
            .map(|lock| lock.status())
            .unwrap_or(LockStatus::Unlocked)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn retaining() -> LockRegistry {
        LockRegistry::new(LockConfig {
            eviction: Eviction::Retain,
            ..LockConfig::default()
        })
    }

    #[test]
    fn test_same_name_same_lock() {
        let registry = LockRegistry::default();
        let a = registry.resolve("report.pdf");
        let b = registry.resolve("report.pdf");
        let c = registry.resolve("other.pdf");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_first_lookup_creates_one_lock() {
        let registry = Arc::new(LockRegistry::default());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.resolve("contended.bin")
                })
            })
            .collect();

        let locks: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(locks.iter().all(|l| Arc::ptr_eq(l, &locks[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_evict_only_when_unreferenced() {
        let registry = LockRegistry::default();
        let held = registry.resolve("busy.txt");

        assert!(!registry.evict_if_idle("busy.txt"));
        assert!(registry.contains("busy.txt"));

        drop(held);
        assert!(registry.evict_if_idle("busy.txt"));
        assert!(!registry.contains("busy.txt"));
        assert!(!registry.evict_if_idle("busy.txt"));
    }

    #[test]
    fn test_prune_keeps_referenced_entries() {
        let registry = LockRegistry::default();
        let kept = registry.resolve("a");
        registry.resolve("b");
        registry.resolve("c");

        assert_eq!(registry.prune(), 2);
        assert_eq!(registry.len(), 1);

        // The surviving entry is still the lock the holder has
        assert!(Arc::ptr_eq(&kept, &registry.resolve("a")));
    }

    #[test]
    fn test_retain_policy_never_evicts() {
        let registry = retaining();
        registry.resolve("a");
        registry.resolve("b");

        assert!(!registry.evict_if_idle("a"));
        assert_eq!(registry.prune(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_status_through_registry() {
        let registry = LockRegistry::default();
        assert_eq!(registry.status("x"), LockStatus::Unlocked);
        assert!(!registry.contains("x"));

        let lock = registry.resolve("x");
        let guard = lock.write().await;
        assert_eq!(registry.status("x"), LockStatus::Exclusive);

        // Held guard keeps the entry alive
        assert_eq!(registry.prune(), 0);
        drop(guard);
        drop(lock);
        assert_eq!(registry.prune(), 1);
    }
}
