//! Per-name reader/writer lock
//!
//! Many sessions may read a file at once; a writer gets it alone. Acquiring
//! is async: a blocked session parks its task instead of an OS thread, and is
//! woken when the state it waits on changes. Guards release on drop, so every
//! exit path of a storage operation (success, short read, error, or a
//! cancelled future) gives the lock back.
//!
//! ```text
//!   write(): queue ──► writer gate (one writer at a time) ──► wait readers == 0 ──► active
//!   read():  wait !active (and, writer-preferred, no queued writers) ──► readers += 1
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedMutexGuard};
use tracing::trace;

use depot_core::{Fairness, LockType};

/// Observable state of one lock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockStatus {
    /// No locks held
    Unlocked,
    /// Shared locks held (multiple readers)
    Shared { readers: usize },
    /// Exclusive lock held (single writer)
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer_active: bool,
    /// Writers that called `write()` but are not active yet
    writers_queued: usize,
}

/// Reader/writer lock for one file name
pub struct FileLock {
    name: String,
    fairness: Fairness,
    state: Mutex<LockState>,
    /// Serializes writers against each other
    writer_gate: Arc<tokio::sync::Mutex<()>>,
    /// Signalled when the last reader leaves
    drained: Notify,
    /// Signalled when a writer finishes or stops waiting
    released: Notify,
}

impl FileLock {
    pub fn new(name: impl Into<String>, fairness: Fairness) -> Self {
        Self {
            name: name.into(),
            fairness,
            state: Mutex::new(LockState::default()),
            writer_gate: Arc::new(tokio::sync::Mutex::new(())),
            drained: Notify::new(),
            released: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire a shared lock, waiting while a writer holds it
    pub async fn read(self: &Arc<Self>) -> ReadGuard {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.try_admit_reader() {
                return ReadGuard {
                    lock: Arc::clone(self),
                };
            }

            trace!(name = %self.name, "reader waiting");
            released.await;
        }
    }

    /// Acquire a shared lock only if that needs no waiting
    pub fn try_read(self: &Arc<Self>) -> Option<ReadGuard> {
        self.try_admit_reader().then(|| ReadGuard {
            lock: Arc::clone(self),
        })
    }

    /// Acquire the exclusive lock.
    ///
    /// Writers queue on the gate in arrival order, then wait for active
    /// readers to drain.
    pub async fn write(self: &Arc<Self>) -> WriteGuard {
        let mut queued = QueuedWriter::enter(self);
        let gate = Arc::clone(&self.writer_gate).lock_owned().await;

        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.readers == 0 {
                    state.writer_active = true;
                    state.writers_queued -= 1;
                    queued.armed = false;
                    break;
                }
                trace!(name = %self.name, readers = state.readers, "writer waiting for drain");
            }

            drained.await;
        }

        WriteGuard {
            lock: Arc::clone(self),
            _gate: gate,
        }
    }

    pub fn status(&self) -> LockStatus {
        let state = self.state.lock();
        if state.writer_active {
            LockStatus::Exclusive
        } else if state.readers > 0 {
            LockStatus::Shared {
                readers: state.readers,
            }
        } else {
            LockStatus::Unlocked
        }
    }

    /// Writers waiting for their turn
    pub fn queued_writers(&self) -> usize {
        self.state.lock().writers_queued
    }

    /// Nobody holds or waits for this lock
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.readers == 0 && !state.writer_active && state.writers_queued == 0
    }

    fn try_admit_reader(&self) -> bool {
        let mut state = self.state.lock();
        let blocked = match self.fairness {
            Fairness::WriterPreferred => state.writer_active || state.writers_queued > 0,
            Fairness::ReaderPreferred => state.writer_active,
        };
        if !blocked {
            state.readers += 1;
        }
        !blocked
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("name", &self.name)
            .field("fairness", &self.fairness)
            .field("status", &self.status())
            .finish()
    }
}

/// Keeps `writers_queued` honest if a `write()` future is dropped mid-wait
struct QueuedWriter<'a> {
    lock: &'a FileLock,
    armed: bool,
}

impl<'a> QueuedWriter<'a> {
    fn enter(lock: &'a FileLock) -> Self {
        lock.state.lock().writers_queued += 1;
        Self { lock, armed: true }
    }
}

impl Drop for QueuedWriter<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lock.state.lock().writers_queued -= 1;
            self.lock.released.notify_waiters();
        }
    }
}

/// Shared access to one name; released on drop
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard {
    lock: Arc<FileLock>,
}

impl ReadGuard {
    pub fn name(&self) -> &str {
        &self.lock.name
    }

    pub fn lock_type(&self) -> LockType {
        LockType::Shared
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        let last = {
            let mut state = self.lock.state.lock();
            state.readers -= 1;
            state.readers == 0
        };
        if last {
            self.lock.drained.notify_waiters();
        }
    }
}

/// Exclusive access to one name; released on drop
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard {
    lock: Arc<FileLock>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteGuard {
    pub fn name(&self) -> &str {
        &self.lock.name
    }

    pub fn lock_type(&self) -> LockType {
        LockType::Exclusive
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.lock.state.lock().writer_active = false;
        self.lock.released.notify_waiters();
        // `_gate` drops after this body, handing the gate to the next writer
    }
}
