//! The heap facade: wires the registry, thread registry, safepoints,
//! epoch state, collector, and finalizer together, and hands mutators
//! their per-thread [`HeapProxy`].

use std::sync::Arc;
use std::thread::JoinHandle;

use object::{ArrayHeader, Header, TypeInfo};

use crate::collector::Collector;
use crate::factory::{ObjectFactory, array_allocated_size, object_allocated_size};
use crate::finalizer::FinalizerProcessor;
use crate::safepoint::Safepoints;
use crate::scheduler::{GcSchedulerConfig, SchedulerTick};
use crate::state::GcStateHolder;
use crate::threads::{MutatorThread, ObjRef, ThreadRegistry};

// Approximate instruction budgets the safepoint entries charge.
const PROLOGUE_WEIGHT: u64 = 8;
const BACK_EDGE_WEIGHT: u64 = 4;
const UNWIND_WEIGHT: u64 = 16;

/// State shared by mutators, the collector, and the finalizer.
#[derive(Debug)]
pub struct HeapShared {
    pub config: GcSchedulerConfig,
    pub factory: ObjectFactory,
    pub threads: ThreadRegistry,
    pub safepoints: Safepoints,
    pub state: Arc<GcStateHolder>,
    pub finalizer: FinalizerProcessor,
}

/// The managed heap. Owns the collector worker; dropping the heap shuts
/// both workers down and joins them.
pub struct Heap {
    shared: Arc<HeapShared>,
    collector: Option<JoinHandle<()>>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(GcSchedulerConfig::default())
    }
}

impl Heap {
    pub fn new(config: GcSchedulerConfig) -> Self {
        let state = Arc::new(GcStateHolder::new());
        let finalizer = {
            let state = state.clone();
            FinalizerProcessor::new(move |epoch| state.finish_finalization(epoch))
        };
        let shared = Arc::new(HeapShared {
            config,
            factory: ObjectFactory::new(),
            threads: ThreadRegistry::new(),
            safepoints: Safepoints::new(),
            state,
            finalizer,
        });
        let collector = Collector::spawn(shared.clone());
        Self {
            shared,
            collector: Some(collector),
        }
    }

    /// Registers the calling thread as a mutator and returns its handle.
    /// Blocks while a suspension is in progress; new threads attach only
    /// between cycles.
    pub fn create_proxy(&self) -> HeapProxy {
        self.shared.safepoints.attach_gate();
        let thread = MutatorThread::new(
            self.shared.factory.create_thread_queue(),
            SchedulerTick::new(self.shared.config),
        );
        self.shared.threads.register(thread.clone());
        HeapProxy {
            shared: self.shared.clone(),
            thread,
        }
    }

    /// Number of published (collector-visible) objects.
    pub fn alive(&self) -> usize {
        self.shared.factory.len()
    }

    pub fn state(&self) -> &GcStateHolder {
        &self.shared.state
    }

    pub fn finalizer(&self) -> &FinalizerProcessor {
        &self.shared.finalizer
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.shared.state.shutdown();
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
        }
        self.shared.finalizer.stop();
    }
}

/// Per-mutator handle: allocation front end, shadow roots, safepoint
/// entries, and blocking collection requests. Dropping the proxy
/// publishes whatever is still local and detaches the thread.
pub struct HeapProxy {
    shared: Arc<HeapShared>,
    thread: Arc<MutatorThread>,
}

impl HeapProxy {
    // ── allocation ────────────────────────────────────────────────

    pub fn create_object(&mut self, type_info: &TypeInfo) -> *mut Header {
        self.safepoint_allocation(object_allocated_size(type_info));
        // SAFETY: we are the owning mutator thread.
        unsafe { self.thread.queue_mut().create_object(type_info) }
    }

    pub fn create_array(&mut self, type_info: &TypeInfo, count: u32) -> *mut ArrayHeader {
        self.safepoint_allocation(array_allocated_size(type_info, count));
        // SAFETY: we are the owning mutator thread.
        unsafe { self.thread.queue_mut().create_array(type_info, count) }
    }

    /// Makes everything allocated so far visible to the collector.
    pub fn publish(&mut self) {
        // SAFETY: we are the owning mutator thread.
        unsafe { self.thread.queue_mut().publish() };
    }

    // ── roots ─────────────────────────────────────────────────────

    pub fn push_stack_root(&self, object: *mut Header) {
        self.thread.roots().stack.push(ObjRef(object));
    }

    pub fn pop_stack_root(&self) -> Option<*mut Header> {
        self.thread.roots().stack.pop().map(|root| root.0)
    }

    pub fn clear_stack_roots(&self) {
        self.thread.roots().stack.clear();
    }

    pub fn add_global_root(&self, object: *mut Header) {
        self.thread.roots().globals.push(ObjRef(object));
    }

    pub fn clear_global_roots(&self) {
        self.thread.roots().globals.clear();
    }

    // ── safepoints ────────────────────────────────────────────────

    pub fn safepoint_function_prologue(&self) {
        self.safepoint_regular(PROLOGUE_WEIGHT);
    }

    pub fn safepoint_loop_back_edge(&self) {
        self.safepoint_regular(BACK_EDGE_WEIGHT);
    }

    pub fn safepoint_exception_unwind(&self) {
        self.safepoint_regular(UNWIND_WEIGHT);
    }

    /// Called before every managed allocation; may request a collection
    /// on heap pressure.
    pub fn safepoint_allocation(&self, size: usize) {
        self.shared.safepoints.poll(&self.thread);
        if self.thread.tick().on_allocation(size) {
            self.shared.state.schedule();
        }
    }

    fn safepoint_regular(&self, weight: u64) {
        self.shared.safepoints.poll(&self.thread);
        if self.thread.tick().on_safepoint(weight) {
            self.shared.state.schedule();
        }
    }

    // ── collection requests ───────────────────────────────────────

    /// Requests a collection without waiting; returns the epoch.
    pub fn schedule_gc(&self) -> i64 {
        self.shared.state.schedule()
    }

    /// Requests a collection and blocks until an epoch at least as new
    /// has finished.
    pub fn schedule_and_wait_full_gc(&self) {
        let epoch = self.shared.state.schedule();
        self.shared.safepoints.enter_native(&self.thread);
        self.shared.state.wait_finished(epoch);
        self.shared.safepoints.leave_native(&self.thread);
    }

    /// Like [`HeapProxy::schedule_and_wait_full_gc`], additionally waits
    /// until the finalizer processor drained that epoch.
    pub fn schedule_and_wait_full_gc_with_finalizers(&self) {
        let epoch = self.shared.state.schedule();
        self.shared.safepoints.enter_native(&self.thread);
        self.shared.state.wait_finished(epoch);
        self.shared.state.wait_finalized(epoch);
        self.shared.safepoints.leave_native(&self.thread);
    }

    /// Informational hook for allocation pressure the mutator could not
    /// absorb; schedules an emergency collection.
    pub fn on_oom(&self, size: usize) {
        tracing::warn!(target: "gc", size, "allocation pressure, scheduling emergency collection");
        self.shared.state.schedule();
    }

    pub fn stop_finalizer_thread(&self) {
        self.shared.finalizer.stop();
    }
}

impl Drop for HeapProxy {
    fn drop(&mut self) {
        // Publish is allocation-free, so teardown cannot lose nodes.
        // SAFETY: we are the owning mutator thread.
        unsafe { self.thread.queue_mut().publish() };
        self.shared.threads.deregister(&self.thread);
        self.shared.safepoints.notify_detach();
    }
}
