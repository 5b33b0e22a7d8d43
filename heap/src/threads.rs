//! The mutator-thread registry: per-thread allocation queues, shadow
//! roots, and the run-state the suspension protocol inspects.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use object::Header;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::factory::ThreadQueue;
use crate::scheduler::SchedulerTick;

/// Run state of a mutator. `Native` threads promise not to touch the
/// managed heap and therefore count as stopped for suspension purposes.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadState {
    Runnable = 0,
    Native = 1,
}

/// A managed reference held in a root slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ObjRef(pub *mut Header);

// SAFETY: the pointee is pinned registry memory; the pointer itself is
// plain data.
unsafe impl Send for ObjRef {}

/// Shadow root slots of one mutator: its stack handles and the globals it
/// registered. The collector reads these with the world stopped.
#[derive(Debug, Default)]
pub struct Roots {
    pub stack: Vec<ObjRef>,
    pub globals: Vec<ObjRef>,
}

impl Roots {
    pub fn for_each(&self, mut f: impl FnMut(*mut Header)) {
        for root in self.stack.iter().chain(self.globals.iter()) {
            f(root.0);
        }
    }
}

/// Everything the substrate tracks for one mutator thread.
#[derive(Debug)]
pub struct MutatorThread {
    /// Owner-only while the thread runs; the collector touches it solely
    /// with the world stopped.
    queue: UnsafeCell<ThreadQueue>,
    roots: Mutex<Roots>,
    parked: AtomicBool,
    state: AtomicU8,
    tick: SchedulerTick,
}

// SAFETY: `queue` is accessed by the owning mutator or, exclusively, by
// the collector while every mutator is stopped; all other fields are
// locked or atomic.
unsafe impl Send for MutatorThread {}
// SAFETY: see above.
unsafe impl Sync for MutatorThread {}

impl MutatorThread {
    pub fn new(queue: ThreadQueue, tick: SchedulerTick) -> Arc<Self> {
        Arc::new(Self {
            queue: UnsafeCell::new(queue),
            roots: Mutex::new(Roots::default()),
            parked: AtomicBool::new(false),
            state: AtomicU8::new(ThreadState::Runnable as u8),
            tick,
        })
    }

    /// # Safety
    /// The caller must be the owning mutator thread, or the collector
    /// while the world is stopped.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn queue_mut(&self) -> &mut ThreadQueue {
        // SAFETY: exclusivity is the caller's contract.
        unsafe { &mut *self.queue.get() }
    }

    pub fn roots(&self) -> MutexGuard<'_, Roots> {
        self.roots.lock()
    }

    pub fn tick(&self) -> &SchedulerTick {
        &self.tick
    }

    pub fn parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    pub fn set_parked(&self, parked: bool) {
        self.parked.store(parked, Ordering::Release);
    }

    pub fn state(&self) -> ThreadState {
        match self.state.load(Ordering::Acquire) {
            0 => ThreadState::Runnable,
            _ => ThreadState::Native,
        }
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether this thread cannot be mutating the managed heap right now.
    pub fn is_stopped(&self) -> bool {
        self.parked() || self.state() == ThreadState::Native
    }
}

/// Registry of live mutators, enumerated by the collector for publishing,
/// root scanning, and the suspension rendezvous.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: RwLock<Vec<Arc<MutatorThread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread: Arc<MutatorThread>) {
        self.threads.write().push(thread);
    }

    pub fn deregister(&self, thread: &Arc<MutatorThread>) {
        self.threads.write().retain(|t| !Arc::ptr_eq(t, thread));
    }

    pub fn for_each_mutator(&self, mut f: impl FnMut(&Arc<MutatorThread>)) {
        for thread in self.threads.read().iter() {
            f(thread);
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.threads.read().iter().all(|t| t.is_stopped())
    }

    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
