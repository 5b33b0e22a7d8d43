//! The mark-and-sweep worker: drives the epoch state machine on its own
//! thread, marks with the world stopped, sweeps concurrently with the
//! resumed mutators, and ships dead nodes to the finalizer processor.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use object::Header;

use crate::factory::{Color, FinalizerQueue, NodeRef};
use crate::heap::HeapShared;

pub(crate) struct Collector {
    shared: Arc<HeapShared>,
}

impl Collector {
    pub(crate) fn spawn(shared: Arc<HeapShared>) -> JoinHandle<()> {
        thread::Builder::new()
            .name("gc-collector".into())
            .spawn(move || Collector { shared }.run())
            .expect("spawn collector thread")
    }

    fn run(&self) {
        tracing::debug!(target: "gc", "collector thread started");
        while let Some(epoch) = self.shared.state.wait_scheduled() {
            self.perform_full_gc(epoch);
        }
        tracing::debug!(target: "gc", "collector thread exiting");
    }

    /// One full collection. Returns false if the cycle yielded because
    /// some other actor already held the world suspended; the epoch is
    /// still finished so waiters cannot hang.
    fn perform_full_gc(&self, epoch: i64) -> bool {
        self.shared.state.start(epoch);
        if !self.shared.safepoints.suspend(&self.shared.threads) {
            tracing::debug!(target: "gc", epoch, "world already suspended, yielding cycle");
            self.shared.state.finish(epoch);
            return false;
        }
        let cycle_start = Instant::now();

        // With every mutator stopped, publish their private queues so the
        // sweep sees everything allocated so far.
        self.shared.threads.for_each_mutator(|thread| {
            // SAFETY: the world is stopped; queue access is exclusive.
            unsafe { thread.queue_mut().publish() };
        });

        let marked = self.mark();
        self.shared.safepoints.resume();

        let dead = self.sweep();
        let swept = dead.len();
        tracing::info!(
            target: "gc",
            epoch,
            marked,
            swept,
            elapsed = ?cycle_start.elapsed(),
            "collection cycle done"
        );

        self.shared.finalizer.schedule_tasks(dead, epoch);
        self.shared.state.finish(epoch);
        true
    }

    /// Stop-the-world mark: paint every object reachable from the root
    /// set Black. The explicit work stack stands in for a grey set.
    fn mark(&self) -> usize {
        let mut work: Vec<*mut Header> = Vec::new();
        let mut marked = 0usize;

        self.shared.threads.for_each_mutator(|thread| {
            thread.roots().for_each(|root| {
                if mark_and_push(&mut work, root) {
                    marked += 1;
                }
            });
        });

        while let Some(obj) = work.pop() {
            // SAFETY: only valid marked objects enter the work stack.
            let trace = unsafe { (*obj).type_info().trace };
            let mut visit = |child: *mut Header| {
                if mark_and_push(&mut work, child) {
                    marked += 1;
                }
            };
            // SAFETY: obj is a live object of its descriptor's type.
            unsafe { trace(obj, &mut visit) };
        }
        marked
    }

    /// Sweep, concurrent with mutators: Black survivors are repainted
    /// White for the next cycle, White nodes move to the finalizer queue.
    /// The registry stays locked for the pass, so publishes block and the
    /// chain cannot grow under the cursor; fresh allocations stay in
    /// producers and are never observed here.
    fn sweep(&self) -> FinalizerQueue {
        let mut dead = FinalizerQueue::new();
        let mut iter = self.shared.factory.lock_for_iter();
        while let Some(node) = iter.current() {
            match node.gc().color() {
                Color::Black => {
                    node.gc().set_color(Color::White);
                    iter.advance();
                }
                Color::White => iter.move_and_advance(&mut dead),
            }
        }
        dead
    }
}

/// Paints `obj` Black and queues it if it is a White heap object.
/// Permanent (off-heap) references and already-Black objects are skipped;
/// a Black object's children are never re-enqueued.
fn mark_and_push(work: &mut Vec<*mut Header>, obj: *mut Header) -> bool {
    if obj.is_null() {
        return false;
    }
    // SAFETY: non-null roots and children point to valid headers.
    let header = unsafe { &*obj };
    if !header.is_heap() {
        return false;
    }
    // SAFETY: heap-tagged headers are embedded in live records.
    let node = unsafe { NodeRef::from_object(obj) };
    let gc = node.gc();
    if gc.color() == Color::White {
        gc.set_color(Color::Black);
        work.push(obj);
        true
    } else {
        false
    }
}
