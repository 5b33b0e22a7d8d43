//! The finalizer processor: a lazily started worker thread that drains
//! batches of dead objects, runs their finalization hooks, releases their
//! memory, and reports epoch completion.

use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::factory::FinalizerQueue;

type EpochDoneCallback = Box<dyn Fn(i64) + Send + Sync>;

#[derive(Default)]
struct ProcessorState {
    queue: FinalizerQueue,
    /// Most recent epoch any batch was scheduled under.
    epoch: i64,
    /// Highest epoch already passed to the done callback.
    reported: i64,
    shutdown: bool,
    new_tasks_allowed: bool,
    running: bool,
    worker: Option<JoinHandle<()>>,
}

struct ProcessorInner {
    state: Mutex<ProcessorState>,
    work_available: Condvar,
    /// Invoked whenever the queue drains. Observes a subset of epochs;
    /// eventually sees the latest one scheduled.
    epoch_done: EpochDoneCallback,
}

pub struct FinalizerProcessor {
    inner: Arc<ProcessorInner>,
}

impl std::fmt::Debug for FinalizerProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerProcessor").finish_non_exhaustive()
    }
}

impl FinalizerProcessor {
    pub fn new(epoch_done: impl Fn(i64) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                state: Mutex::new(ProcessorState {
                    new_tasks_allowed: true,
                    ..ProcessorState::default()
                }),
                work_available: Condvar::new(),
                epoch_done: Box::new(epoch_done),
            }),
        }
    }

    /// Queues a batch of dead objects for epoch `epoch`, starting the
    /// worker if needed. After [`FinalizerProcessor::stop`] the batch is
    /// silently dropped (its memory is still released).
    pub fn schedule_tasks(&self, tasks: FinalizerQueue, epoch: i64) {
        let mut state = self.inner.state.lock();

        if !state.new_tasks_allowed {
            tracing::debug!(target: "gc::finalizer", epoch, dropped = tasks.len(),
                "finalizer stopped, dropping batch");
            return;
        }

        if tasks.is_empty() && state.worker.is_none() {
            // Nothing queued and nobody to drain it: the epoch is done.
            state.epoch = state.epoch.max(epoch);
            state.reported = state.reported.max(epoch);
            drop(state);
            (self.inner.epoch_done)(epoch);
            return;
        }

        state.queue.merge(tasks);
        state.epoch = state.epoch.max(epoch);
        if state.worker.is_none() {
            state.running = true;
            let inner = self.inner.clone();
            let handle = thread::Builder::new()
                .name("gc-finalizer".into())
                .spawn(move || worker_loop(inner))
                .expect("spawn finalizer thread");
            state.worker = Some(handle);
        }
        self.inner.work_available.notify_one();
    }

    /// Disallows further batches, drains what is queued, and joins the
    /// worker. Idempotent.
    pub fn stop(&self) {
        let worker = {
            let mut state = self.inner.state.lock();
            state.new_tasks_allowed = false;
            state.shutdown = true;
            self.inner.work_available.notify_one();
            state.worker.take()
        };
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }
}

impl Drop for FinalizerProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(inner: Arc<ProcessorInner>) {
    let mut state = inner.state.lock();
    loop {
        while state.queue.is_empty() && state.reported >= state.epoch && !state.shutdown {
            inner.work_available.wait(&mut state);
        }
        if state.queue.is_empty() && state.shutdown {
            break;
        }

        if state.queue.is_empty() {
            // The epoch advanced without producing garbage; report it.
            let epoch = state.epoch;
            state.reported = epoch;
            drop(state);
            (inner.epoch_done)(epoch);
            state = inner.state.lock();
            continue;
        }

        let batch = mem::take(&mut state.queue);
        drop(state);

        tracing::debug!(target: "gc::finalizer", batch = batch.len(), "finalizing batch");
        batch.run_finalizers();
        drop(batch); // releases node memory

        state = inner.state.lock();
        if state.queue.is_empty() {
            let epoch = state.epoch;
            state.reported = epoch;
            drop(state);
            (inner.epoch_done)(epoch);
            state = inner.state.lock();
        }
    }
    state.running = false;
}
