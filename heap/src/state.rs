//! Epoch bookkeeping shared between mutators, the collector, and the
//! finalizer processor.

use parking_lot::{Condvar, Mutex};

/// Epoch markers. For any epoch `e` the order is
/// `scheduled(e) → started(e) → finished(e)`; `finalized` trails behind
/// whenever finalization is requested. Requests arriving while a
/// collection is pending coalesce into the pending epoch, so
/// `finished(e)` before `scheduled(e + 1)` is not guaranteed.
#[derive(Debug, Default)]
struct EpochState {
    scheduled: i64,
    started: i64,
    finished: i64,
    finalized: i64,
    shutdown: bool,
}

#[derive(Debug, Default)]
pub struct GcStateHolder {
    state: Mutex<EpochState>,
    changed: Condvar,
}

impl GcStateHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a collection and returns the epoch to wait on. Coalesces
    /// with an already-pending request.
    pub fn schedule(&self) -> i64 {
        let mut state = self.state.lock();
        if state.scheduled <= state.finished {
            state.scheduled += 1;
            self.changed.notify_all();
        }
        state.scheduled
    }

    /// Collector side: blocks until a collection is pending. Returns
    /// `None` once shut down.
    pub fn wait_scheduled(&self) -> Option<i64> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if state.scheduled > state.finished {
                return Some(state.scheduled);
            }
            self.changed.wait(&mut state);
        }
    }

    pub fn start(&self, epoch: i64) {
        let mut state = self.state.lock();
        debug_assert!(epoch <= state.scheduled);
        state.started = state.started.max(epoch);
        self.changed.notify_all();
    }

    pub fn finish(&self, epoch: i64) {
        let mut state = self.state.lock();
        debug_assert!(epoch <= state.started);
        state.finished = state.finished.max(epoch);
        self.changed.notify_all();
    }

    /// Records that the finalizer drained everything up to `epoch`. May be
    /// called for any subset of epochs; only the maximum matters.
    pub fn finish_finalization(&self, epoch: i64) {
        let mut state = self.state.lock();
        state.finalized = state.finalized.max(epoch);
        self.changed.notify_all();
    }

    /// Blocks until `finished(epoch)` (or shutdown).
    pub fn wait_finished(&self, epoch: i64) {
        let mut state = self.state.lock();
        while state.finished < epoch && !state.shutdown {
            self.changed.wait(&mut state);
        }
    }

    /// Blocks until finalization reached `epoch` (or shutdown).
    pub fn wait_finalized(&self, epoch: i64) {
        let mut state = self.state.lock();
        while state.finalized < epoch && !state.shutdown {
            self.changed.wait(&mut state);
        }
    }

    /// Wakes every waiter and makes the workers exit their loops.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.changed.notify_all();
    }

    pub fn scheduled_epoch(&self) -> i64 {
        self.state.lock().scheduled
    }

    pub fn finished_epoch(&self) -> i64 {
        self.state.lock().finished
    }

    pub fn finalized_epoch(&self) -> i64 {
        self.state.lock().finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn schedule_bumps_once_until_finished() {
        let state = GcStateHolder::new();
        assert_eq!(state.schedule(), 1);
        assert_eq!(state.schedule(), 1);
        assert_eq!(state.schedule(), 1);

        state.start(1);
        state.finish(1);
        assert_eq!(state.schedule(), 2);
    }

    #[test]
    fn concurrent_requests_coalesce() {
        let state = Arc::new(GcStateHolder::new());
        let mut joins = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            joins.push(thread::spawn(move || state.schedule()));
        }
        let epochs: Vec<i64> = joins.into_iter().map(|j| j.join().unwrap()).collect();
        assert!(epochs.iter().all(|&e| e == 1));
    }

    #[test]
    fn waiters_release_on_finish() {
        let state = Arc::new(GcStateHolder::new());
        let requested = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for _ in 0..3 {
            let state = state.clone();
            let requested = requested.clone();
            let released = released.clone();
            joins.push(thread::spawn(move || {
                let epoch = state.schedule();
                requested.fetch_add(1, Ordering::SeqCst);
                state.wait_finished(epoch);
                released.fetch_add(1, Ordering::SeqCst);
            }));
        }

        // Finish only after every request landed, so all of them wait on
        // the same coalesced epoch.
        while requested.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(released.load(Ordering::SeqCst), 0);

        let epoch = state.wait_scheduled().unwrap();
        state.start(epoch);
        state.finish(epoch);

        for j in joins {
            j.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn finalization_trails_finish() {
        let state = GcStateHolder::new();
        let epoch = state.schedule();
        state.start(epoch);
        state.finish(epoch);
        assert_eq!(state.finalized_epoch(), 0);

        state.finish_finalization(epoch);
        state.wait_finalized(epoch);
        assert_eq!(state.finalized_epoch(), epoch);

        // Stale reports never roll it back.
        state.finish_finalization(epoch - 1);
        assert_eq!(state.finalized_epoch(), epoch);
    }

    #[test]
    fn shutdown_wakes_the_collector() {
        let state = Arc::new(GcStateHolder::new());
        let worker = {
            let state = state.clone();
            thread::spawn(move || state.wait_scheduled())
        };
        thread::sleep(Duration::from_millis(20));
        state.shutdown();
        assert_eq!(worker.join().unwrap(), None);
    }
}
