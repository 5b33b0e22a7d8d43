//! The suspension rendezvous between the collector and the mutators.
//!
//! Mutators poll a single process-wide flag at their safepoints; when it
//! is raised they park until the collector releases the world. The
//! collector raises the flag, then waits until every registered mutator
//! is parked or has declared itself `Native`.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::threads::{MutatorThread, ThreadRegistry, ThreadState};

#[derive(Debug, Default)]
pub struct Safepoints {
    suspend_requested: AtomicBool,
    lock: Mutex<()>,
    /// Signaled by mutators whenever their stopped-ness changes; the
    /// collector re-evaluates the registry on each wakeup.
    stopped_changed: Condvar,
    /// Broadcast by the collector when the world resumes.
    resumed: Condvar,
}

impl Safepoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// The safepoint fast path: one load-and-test. Called from every
    /// safepoint entry; the slow path parks.
    #[inline(always)]
    pub fn poll(&self, thread: &MutatorThread) {
        if self.suspend_requested.load(Ordering::Relaxed) {
            self.park(thread);
        }
    }

    #[cold]
    fn park(&self, thread: &MutatorThread) {
        let mut guard = self.lock.lock();
        thread.set_parked(true);
        self.stopped_changed.notify_all();
        while self.suspend_requested.load(Ordering::Acquire) {
            self.resumed.wait(&mut guard);
        }
        thread.set_parked(false);
    }

    pub fn is_suspend_requested(&self) -> bool {
        self.suspend_requested.load(Ordering::Acquire)
    }

    /// Raises the suspension flag and waits until every registered
    /// mutator has stopped. Returns false without waiting if some other
    /// actor already holds the world suspended.
    pub fn suspend(&self, threads: &ThreadRegistry) -> bool {
        if self.suspend_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut guard = self.lock.lock();
        while !threads.all_stopped() {
            self.stopped_changed.wait(&mut guard);
        }
        true
    }

    /// Releases the world; every parked mutator resumes.
    pub fn resume(&self) {
        let _guard = self.lock.lock();
        self.suspend_requested.store(false, Ordering::Release);
        self.resumed.notify_all();
    }

    /// Declares the thread `Native`: it promises to stay off the managed
    /// heap and counts as stopped from now on.
    pub fn enter_native(&self, thread: &MutatorThread) {
        let _guard = self.lock.lock();
        thread.set_state(ThreadState::Native);
        self.stopped_changed.notify_all();
    }

    /// Returns the thread to `Runnable`, parking first if a suspension is
    /// in progress.
    pub fn leave_native(&self, thread: &MutatorThread) {
        let mut guard = self.lock.lock();
        while self.suspend_requested.load(Ordering::Acquire) {
            self.resumed.wait(&mut guard);
        }
        thread.set_state(ThreadState::Runnable);
    }

    /// Gate for threads attaching to the runtime: a new mutator may not
    /// register while the world is suspended.
    pub fn attach_gate(&self) {
        let mut guard = self.lock.lock();
        while self.suspend_requested.load(Ordering::Acquire) {
            self.resumed.wait(&mut guard);
        }
    }

    /// Called after a mutator deregisters so a waiting collector
    /// re-evaluates the registry.
    pub fn notify_detach(&self) {
        let _guard = self.lock.lock();
        self.stopped_changed.notify_all();
    }
}
