//! Typed façade over the registry: object/array records, node recovery,
//! and the dead-object queue handed to the finalizer.

use std::mem::offset_of;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use object::{ArrayHeader, Header, OBJECT_ALIGNMENT, TypeInfo};

use crate::registry::{self, Consumer, Node, Producer, Storage, align_up};

// ── mark state ────────────────────────────────────────────────────────

/// Per-object mark color. All objects are born White; the mark phase
/// paints reachable objects Black; the sweep repaints survivors White for
/// the next cycle and reclaims whatever stayed White.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Color {
    White = 0,
    Black = 1,
}

/// GC metadata preceding the embedded header inside a record. Atomic
/// because the sweep repaints colors while mutators keep running.
#[derive(Debug)]
pub struct GcData {
    color: AtomicU8,
}

impl GcData {
    fn new() -> Self {
        Self {
            color: AtomicU8::new(Color::White as u8),
        }
    }

    #[inline(always)]
    pub fn color(&self) -> Color {
        match self.color.load(Ordering::Relaxed) {
            0 => Color::White,
            _ => Color::Black,
        }
    }

    #[inline(always)]
    pub fn set_color(&self, color: Color) {
        self.color.store(color as u8, Ordering::Relaxed);
    }
}

// ── record layouts ────────────────────────────────────────────────────

/// Node data region of a plain object: GC metadata, then the embedded
/// header, then the object body.
#[repr(C)]
pub struct ObjectRecord {
    gc: GcData,
    object: Header,
}

/// Node data region of an array. Prefix-compatible with [`ObjectRecord`]:
/// the header offsets are identical, so a record of either shape can be
/// read through the object view.
#[repr(C)]
pub struct ArrayRecord {
    gc: GcData,
    array: ArrayHeader,
}

const HEADER_OFFSET: usize = offset_of!(ObjectRecord, object);
const _: () = assert!(HEADER_OFFSET == offset_of!(ArrayRecord, array));

/// Node data size for an object of the given type.
pub fn object_allocated_size(type_info: &TypeInfo) -> usize {
    debug_assert!(!type_info.is_array());
    let body = type_info.object_size() - size_of::<Header>();
    align_up(size_of::<ObjectRecord>() + body, OBJECT_ALIGNMENT)
}

/// Node data size for an array of `count` elements.
pub fn array_allocated_size(type_info: &TypeInfo, count: u32) -> usize {
    debug_assert!(type_info.is_array());
    let body = type_info.element_size() * count as usize;
    align_up(size_of::<ArrayRecord>() + body, OBJECT_ALIGNMENT)
}

// ── node references ───────────────────────────────────────────────────

/// Handle to a registered node, recovered from the embedded header
/// pointer a mutator holds. Grants access to the surrounding GC metadata
/// and the typed header views.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NodeRef {
    node: NonNull<Node>,
}

impl NodeRef {
    pub(crate) fn new(node: NonNull<Node>) -> Self {
        Self { node }
    }

    /// Recovers the node containing `object`. Works for both shapes; the
    /// header offsets of object and array records coincide.
    ///
    /// # Safety
    /// `object` must point to the embedded header of a live registered
    /// record (`Header::is_heap()` holds).
    pub unsafe fn from_object(object: *mut Header) -> Self {
        // SAFETY: caller guarantees a live header.
        debug_assert!(unsafe { (*object).is_heap() }, "must be a heap object");
        // SAFETY: the header lives at HEADER_OFFSET inside the record.
        let record = unsafe { object.cast::<u8>().sub(HEADER_OFFSET) };
        // SAFETY: the record is the node's data region.
        Self::new(unsafe { Node::from_data(record) })
    }

    /// # Safety
    /// Same contract as [`NodeRef::from_object`], for an array header.
    pub unsafe fn from_array(array: *mut ArrayHeader) -> Self {
        // SAFETY: ArrayHeader is prefix-compatible with Header.
        unsafe { Self::from_object(array.cast::<Header>()) }
    }

    fn record(&self) -> *mut ObjectRecord {
        Node::data(self.node).cast::<ObjectRecord>()
    }

    pub fn gc(&self) -> &GcData {
        // SAFETY: every registered node holds a record with leading GcData.
        unsafe { &(*self.record()).gc }
    }

    /// The embedded header, regardless of shape.
    pub fn header(&self) -> *mut Header {
        // SAFETY: record layout puts the header at a fixed offset.
        unsafe { &raw mut (*self.record()).object }
    }

    pub fn is_array(&self) -> bool {
        // SAFETY: the header is initialized for every registered record.
        unsafe { (*self.header()).is_array() }
    }

    pub fn as_object(&self) -> *mut Header {
        debug_assert!(!self.is_array(), "must not be an array");
        self.header()
    }

    pub fn as_array(&self) -> *mut ArrayHeader {
        debug_assert!(self.is_array(), "must be an array");
        self.header().cast::<ArrayHeader>()
    }
}

// ── thread queue ──────────────────────────────────────────────────────

/// Per-mutator allocation front end: inserts records into the thread's
/// private producer chain. Everything allocated here stays invisible to
/// the collector until published.
#[derive(Debug)]
pub struct ThreadQueue {
    producer: Producer,
}

impl ThreadQueue {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            producer: Producer::new(storage),
        }
    }

    /// Allocates and initializes a plain object with a zeroed body;
    /// returns the embedded header, the identity the mutator keeps.
    pub fn create_object(&mut self, type_info: &TypeInfo) -> *mut Header {
        debug_assert!(!type_info.is_array(), "must not be an array type");
        let node = self.producer.insert(object_allocated_size(type_info));
        let record = Node::data(node).cast::<ObjectRecord>();
        // SAFETY: the node's data region is big enough for the record and
        // exclusively ours until the header pointer escapes.
        unsafe {
            (&raw mut (*record).gc).write(GcData::new());
            let header = &raw mut (*record).object;
            header.write(Header::new(type_info));
            (*record).object.mark_heap();
            let body = type_info.object_size() - size_of::<Header>();
            header.cast::<u8>().add(size_of::<Header>()).write_bytes(0, body);
            header
        }
    }

    /// Allocates and initializes an array of `count` elements. Element
    /// storage is zeroed.
    pub fn create_array(&mut self, type_info: &TypeInfo, count: u32) -> *mut ArrayHeader {
        debug_assert!(type_info.is_array(), "must be an array type");
        let data_size = array_allocated_size(type_info, count);
        let node = self.producer.insert(data_size);
        let record = Node::data(node).cast::<ArrayRecord>();
        // SAFETY: as in create_object; the element storage trails the
        // record inside the same allocation.
        unsafe {
            (&raw mut (*record).gc).write(GcData::new());
            (&raw mut (*record).array).write(ArrayHeader::new(type_info, count));
            (*record).array.header().mark_heap();
            let body = type_info.element_size() * count as usize;
            (*record).array.data().write_bytes(0, body);
            &raw mut (*record).array
        }
    }

    /// Splices everything allocated so far onto the shared registry.
    pub fn publish(&mut self) {
        self.producer.publish();
    }

    pub fn len(&self) -> usize {
        self.producer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.producer.iter().map(NodeRef::new)
    }
}

// ── finalizer queue ───────────────────────────────────────────────────

/// Dead nodes detached during sweep, pending finalization. Owns its
/// nodes: dropping the queue releases their memory.
#[derive(Debug, Default)]
pub struct FinalizerQueue {
    consumer: Consumer,
}

impl FinalizerQueue {
    pub fn new() -> Self {
        Self {
            consumer: Consumer::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn merge(&mut self, other: FinalizerQueue) {
        self.consumer.merge(other.consumer);
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.consumer.iter().map(NodeRef::new)
    }

    /// Runs the user-visible finalization hook of every queued object.
    /// Memory is released when the queue is dropped, not here.
    pub fn run_finalizers(&self) {
        for node in self.iter() {
            let header = node.header();
            // SAFETY: queued nodes hold fully initialized records.
            let type_info = unsafe { (*header).type_info() };
            if let Some(finalize) = type_info.finalize {
                // SAFETY: the object is dead but still intact.
                unsafe { finalize(header) };
            }
        }
    }
}

// ── factory ───────────────────────────────────────────────────────────

/// The global registry of every managed object, viewed through typed
/// records.
#[derive(Debug)]
pub struct ObjectFactory {
    storage: Arc<Storage>,
}

impl Default for ObjectFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectFactory {
    pub fn new() -> Self {
        Self {
            storage: Storage::new(),
        }
    }

    pub fn create_thread_queue(&self) -> ThreadQueue {
        ThreadQueue::new(self.storage.clone())
    }

    /// Number of published records.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Locks the registry and returns a mutating cursor over it.
    pub fn lock_for_iter(&self) -> FactoryIter<'_> {
        FactoryIter {
            iter: self.storage.lock_for_iter(),
        }
    }
}

/// Cursor over the locked registry yielding [`NodeRef`]s.
pub struct FactoryIter<'a> {
    iter: registry::Iter<'a>,
}

impl<'a> FactoryIter<'a> {
    pub fn len(&self) -> usize {
        self.iter.len()
    }

    pub fn current(&self) -> Option<NodeRef> {
        self.iter.current().map(NodeRef::new)
    }

    pub fn advance(&mut self) {
        self.iter.advance();
    }

    pub fn erase_and_advance(&mut self) {
        self.iter.erase_and_advance();
    }

    pub fn move_and_advance(&mut self, queue: &mut FinalizerQueue) {
        self.iter.move_and_advance(&mut queue.consumer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    unsafe fn trace_none(_obj: *mut Header, _visitor: &mut dyn FnMut(*mut Header)) {}

    #[repr(C)]
    struct Pair {
        header: Header,
        left: *mut Header,
        right: *mut Header,
    }

    static PAIR: TypeInfo = TypeInfo::object(size_of::<Pair>() as i32, trace_none);
    static U64S: TypeInfo = TypeInfo::array(8, trace_none);

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_finalize(_obj: *mut Header) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    static COUNTED: TypeInfo =
        TypeInfo::object(size_of::<Pair>() as i32, trace_none).with_finalizer(count_finalize);

    #[test]
    fn object_records_round_trip() {
        let factory = ObjectFactory::new();
        let mut queue = factory.create_thread_queue();

        let obj = queue.create_object(&PAIR);
        assert!(unsafe { (*obj).is_heap() });
        assert!(!unsafe { (*obj).is_array() });

        let node = unsafe { NodeRef::from_object(obj) };
        assert_eq!(node.gc().color(), Color::White);
        assert!(!node.is_array());
        assert_eq!(node.as_object(), obj);

        node.gc().set_color(Color::Black);
        assert_eq!(unsafe { NodeRef::from_object(obj) }.gc().color(), Color::Black);
    }

    #[test]
    fn array_records_round_trip() {
        let factory = ObjectFactory::new();
        let mut queue = factory.create_thread_queue();

        let array = queue.create_array(&U64S, 12);
        assert_eq!(unsafe { (*array).count() }, 12);
        assert!(unsafe { (*array).header().is_heap() });

        let node = unsafe { NodeRef::from_array(array) };
        assert!(node.is_array());
        assert_eq!(node.as_array(), array);
        assert_eq!(node.gc().color(), Color::White);

        // Element storage is zeroed and inline.
        let data = unsafe { (*array).data() }.cast::<u64>();
        for i in 0..12 {
            assert_eq!(unsafe { data.add(i).read() }, 0);
        }
    }

    #[test]
    fn array_and_object_views_share_a_prefix() {
        let factory = ObjectFactory::new();
        let mut queue = factory.create_thread_queue();

        let array = queue.create_array(&U64S, 3);
        let as_object = array.cast::<Header>();
        let via_object = unsafe { NodeRef::from_object(as_object) };
        let via_array = unsafe { NodeRef::from_array(array) };
        assert_eq!(via_object, via_array);
        assert!(via_object.is_array());
    }

    #[test]
    fn identity_is_stable_across_publish() {
        let factory = ObjectFactory::new();
        let mut queue = factory.create_thread_queue();

        let obj = queue.create_object(&PAIR);
        let before = unsafe { NodeRef::from_object(obj) };
        queue.publish();
        let after = unsafe { NodeRef::from_object(obj) };
        assert_eq!(before, after);
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn allocated_sizes_are_aligned_and_cover_the_body() {
        assert_eq!(object_allocated_size(&PAIR) % OBJECT_ALIGNMENT, 0);
        assert!(object_allocated_size(&PAIR) >= size_of::<ObjectRecord>());

        let small = array_allocated_size(&U64S, 1);
        let big = array_allocated_size(&U64S, 100);
        assert_eq!(big - small, 99 * 8);
    }

    #[test]
    fn finalizer_queue_runs_hooks_then_frees_on_drop() {
        let factory = ObjectFactory::new();
        let mut queue = factory.create_thread_queue();
        for _ in 0..5 {
            queue.create_object(&COUNTED);
        }
        queue.publish();

        let mut dead = FinalizerQueue::new();
        {
            let mut iter = factory.lock_for_iter();
            while iter.current().is_some() {
                iter.move_and_advance(&mut dead);
            }
        }
        assert_eq!(dead.len(), 5);
        assert_eq!(factory.len(), 0);

        FINALIZED.store(0, Ordering::SeqCst);
        dead.run_finalizers();
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 5);
        drop(dead);
    }

    #[test]
    fn thread_queue_iterates_unpublished_records() {
        let factory = ObjectFactory::new();
        let mut queue = factory.create_thread_queue();
        let a = queue.create_object(&PAIR);
        let b = queue.create_object(&PAIR);

        let seen: Vec<_> = queue.iter().map(|n| n.as_object()).collect();
        assert_eq!(seen, vec![a, b]);
    }
}
