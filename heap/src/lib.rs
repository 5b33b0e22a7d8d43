mod collector;
mod factory;
mod finalizer;
mod heap;
mod lock;
mod registry;
mod safepoint;
mod scheduler;
mod state;
mod system;
mod threads;

pub use factory::{
    Color, FactoryIter, FinalizerQueue, GcData, NodeRef, ObjectFactory, ThreadQueue,
    array_allocated_size, object_allocated_size,
};
pub use finalizer::FinalizerProcessor;
pub use heap::{Heap, HeapProxy, HeapShared};
pub use lock::{SpinGuard, SpinLock};
pub use registry::{ChainIter, Consumer, Iter, Node, Producer, Storage, data_offset};
pub use safepoint::Safepoints;
pub use scheduler::{GcSchedulerConfig, SchedulerTick};
pub use state::GcStateHolder;
pub use system::{block_alloc, block_free, cpu_count};
pub use threads::{MutatorThread, ObjRef, Roots, ThreadRegistry, ThreadState};
