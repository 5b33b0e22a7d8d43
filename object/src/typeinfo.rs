use bitflags::bitflags;

use crate::Header;

/// Enumerates the managed children of an object.
///
/// Given a pointer to a heap object (whose first bytes are a [`Header`]),
/// the function must call `visitor` for every field that may hold a managed
/// reference. Null children may be passed through; the caller filters them.
///
/// # Safety
///
/// `obj` must point to a valid, initialized object of the descriptor's type.
pub type TraceFn = unsafe fn(obj: *mut Header, visitor: &mut dyn FnMut(*mut Header));

/// Runs the user-visible finalization of a dead object.
///
/// # Safety
///
/// `obj` must point to a valid object of the descriptor's type; the object
/// is unreachable and its memory is released right after the call.
pub type FinalizeFn = unsafe fn(obj: *mut Header);

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        const IS_ARRAY = 1 << 0;
        const HAS_FINALIZER = 1 << 1;
    }
}

/// Runtime descriptor of a managed type.
///
/// For plain objects `instance_size` is the nonnegative in-memory size
/// including the embedded [`Header`]. For arrays it is the *negated* element
/// size, so the total body size of an `n`-element array is
/// `-instance_size * n`.
#[derive(Debug)]
pub struct TypeInfo {
    pub instance_size: i32,
    pub flags: TypeFlags,
    pub trace: TraceFn,
    pub finalize: Option<FinalizeFn>,
}

impl TypeInfo {
    pub const fn object(instance_size: i32, trace: TraceFn) -> Self {
        Self {
            instance_size,
            flags: TypeFlags::empty(),
            trace,
            finalize: None,
        }
    }

    pub const fn array(element_size: i32, trace: TraceFn) -> Self {
        Self {
            instance_size: -element_size,
            flags: TypeFlags::IS_ARRAY,
            trace,
            finalize: None,
        }
    }

    pub const fn with_finalizer(mut self, finalize: FinalizeFn) -> Self {
        self.flags = self.flags.union(TypeFlags::HAS_FINALIZER);
        self.finalize = Some(finalize);
        self
    }

    #[inline(always)]
    pub fn is_array(&self) -> bool {
        self.flags.contains(TypeFlags::IS_ARRAY)
    }

    #[inline(always)]
    pub fn has_finalizer(&self) -> bool {
        self.flags.contains(TypeFlags::HAS_FINALIZER)
    }

    /// Object size including the header.
    #[inline]
    pub fn object_size(&self) -> usize {
        debug_assert!(!self.is_array(), "object_size on an array type");
        debug_assert!(self.instance_size as usize >= size_of::<Header>());
        self.instance_size as usize
    }

    /// Size of one array element.
    #[inline]
    pub fn element_size(&self) -> usize {
        debug_assert!(self.is_array(), "element_size on a non-array type");
        (-(self.instance_size as i64)) as usize
    }
}
