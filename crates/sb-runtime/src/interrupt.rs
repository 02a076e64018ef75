use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    NotStarted,
    Running,
    Exited,
}

/// Lifecycle state plus the cooperative cancellation flag of one bridge instance.
#[derive(Debug)]
pub(crate) struct RunControl {
    state: Mutex<ExecutionState>,
    interrupted: AtomicBool,
}

impl RunControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ExecutionState::NotStarted),
            interrupted: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ExecutionState {
        *self.state.lock()
    }

    /// `NotStarted -> Running`. Any other starting state is refused.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ExecutionState::NotStarted {
            return false;
        }
        *state = ExecutionState::Running;
        true
    }

    pub(crate) fn exit(&self) {
        *self.state.lock() = ExecutionState::Exited;
    }

    /// No effect once the instance has exited.
    pub(crate) fn interrupt(&self) -> bool {
        let state = self.state.lock();
        if *state == ExecutionState::Exited {
            return false;
        }
        self.interrupted.store(true, Ordering::Release);
        true
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

/// Cancels one bridge instance from any thread. Callers build timeouts on top of this.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    control: Arc<RunControl>,
}

impl InterruptHandle {
    pub(crate) fn new(control: Arc<RunControl>) -> Self {
        Self { control }
    }

    pub fn interrupt(&self) -> bool {
        self.control.interrupt()
    }

    pub fn state(&self) -> ExecutionState {
        self.control.state()
    }
}

type Shard = RwLock<HashMap<ThreadId, Vec<Weak<RunControl>>>>;

/// Maps executing threads to the bridge instances running on them.
///
/// The table is split into independently locked shards. Registration and removal only
/// write-lock the caller's shard, and [`InterruptRegistry::interrupt_all`] read-locks one
/// shard at a time to take a snapshot before signalling anything. Entries hold weak
/// references, so a stale entry can never keep an instance alive.
#[derive(Debug)]
pub struct InterruptRegistry {
    shards: Vec<Shard>,
}

impl Default for InterruptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, thread: ThreadId) -> &Shard {
        let mut hasher = DefaultHasher::new();
        thread.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    pub(crate) fn register(self: &Arc<Self>, control: &Arc<RunControl>) -> Registration {
        let thread = thread::current().id();
        let entry = Arc::downgrade(control);
        self.shard(thread)
            .write()
            .entry(thread)
            .or_default()
            .push(entry.clone());
        Registration {
            registry: Arc::clone(self),
            thread,
            entry,
        }
    }

    /// Signals every registered instance to halt at its next safe point.
    /// Returns how many instances accepted the signal.
    pub fn interrupt_all(&self) -> usize {
        let snapshot = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .values()
                    .flat_map(|entries| entries.iter().cloned())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let signalled = snapshot
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|control| control.interrupt())
            .count();
        tracing::debug!(signalled, "interrupt requested for running scripts");
        signalled
    }

    pub(crate) fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn remove(&self, thread: ThreadId, entry: &Weak<RunControl>) {
        let mut shard = self.shard(thread).write();
        if let Some(entries) = shard.get_mut(&thread) {
            entries.retain(|existing| !existing.ptr_eq(entry));
            if entries.is_empty() {
                shard.remove(&thread);
            }
        }
    }
}

/// Removes its registry entry when dropped.
#[derive(Debug)]
pub(crate) struct Registration {
    registry: Arc<InterruptRegistry>,
    thread: ThreadId,
    entry: Weak<RunControl>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.thread, &self.entry);
    }
}
