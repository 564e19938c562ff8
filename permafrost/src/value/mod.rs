//! Reference-counted, dynamically-kinded heap values.

pub use self::{mutable_ref::*, scalar::*, val::*};

pub (crate) use self::{
    array::{OnHeapArray, array_payload_size},
    big_integer::OnHeapBigInteger,
    byte_array::{OnHeapByteArray, byte_array_payload_size},
    cell::OnHeapCell,
    constructor::{OnHeapConstructor, constructor_payload_size},
    mutable_ref::OnHeapMutableRef,
    string::{OnHeapString, string_payload_size},
    thunk::OnHeapThunk,
};

use {
    scope_exit::ScopeExit,
    std::{
        alloc::{Layout, handle_alloc_error},
        fmt,
        marker::PhantomData,
        mem::{ManuallyDrop, align_of, size_of},
        num::NonZeroU64,
        process::abort,
        ptr::{self, NonNull},
        sync::atomic::{AtomicU32, Ordering::{Acquire, Relaxed, Release}, fence},
    },
    thiserror::Error,
};

mod array;
mod big_integer;
mod byte_array;
mod cell;
mod constructor;
mod eq;
mod mutable_ref;
mod promise;
mod scalar;
mod string;
mod task;
mod thunk;
mod val;

/// Reference-counted, dynamically-kinded value.
///
/// A [`Value`] object can represent any value of any [kind][`Kind`].
/// Once a value has been constructed using one of the methods on [`Value`],
/// it can be conveniently inspected using [`borrow`][`Value::borrow`].
///
/// # Examples
///
/// ```
/// # use permafrost::value::{Val, Value};
/// let value = Value::string_from_bytes(b"hello").unwrap();
/// assert!(matches!(value.borrow(), Val::String(b"hello")));
/// ```
#[repr(transparent)]
pub struct Value
{
    /// Scalar or on-heap data, depending on least significant bit.
    ///
    /// Iff the least significant bit is set, the value is a scalar.
    /// The remaining 63 bits are the scalar payload.
    ///
    /// Otherwise the value is the address of an [`OnHeapHeader`],
    /// which is immediately followed by the on-heap payload.
    /// The header contains an atomic reference count and an "extra word".
    /// The extra word contains 28 bits of extra data and 4 bits of tag.
    ///
    /// Scalars are never zero, because they are tagged.
    /// Likewise, pointers to on-heap data are never null.
    /// Using [`NonZeroU64`] we benefit from niche optimization.
    inner: NonZeroU64,

    /// Make sure we don't get implicit auto trait impls.
    _phantom_data: PhantomData<*const ()>,
}

/// The kind of a value.
///
/// This is a closed set; every kind has a case in
/// both the compactor and the compacted region fixup.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Kind
{
    Scalar,
    Constructor,
    Array,
    ByteArray,
    String,
    Thunk,
    Task,
    Promise,
    MutableRef,
    BigInteger,
}

/// The different possible tags of an on-heap value.
///
/// For each tag we document the structure of associated extra data.
/// The structure of the payloads is documented on their types.
pub (crate) mod on_heap_tag
{
    // NOTE: Tags must not use more than 4 bits each.
    // NOTE: 0b1111 is reserved for compacted region terminators.

    /// The value is a constructor.
    ///
    /// The extra data is the constructor tag.
    pub const CONSTRUCTOR: u32 = 0b0000;

    /// The value is an array of values.
    ///
    /// The extra data is zero.
    pub const ARRAY: u32 = 0b0001;

    /// The value is an array of unboxed elements.
    ///
    /// The extra data is the size of each element in bytes.
    pub const BYTE_ARRAY: u32 = 0b0010;

    /// The value is a string.
    ///
    /// The extra data is zero.
    pub const STRING: u32 = 0b0011;

    /// The value is a thunk.
    ///
    /// The extra data is zero.
    pub const THUNK: u32 = 0b0100;

    /// The value is a task.
    ///
    /// The extra data is zero.
    pub const TASK: u32 = 0b0101;

    /// The value is a promise.
    ///
    /// The extra data is zero.
    pub const PROMISE: u32 = 0b0110;

    /// The value is a mutable reference.
    ///
    /// The extra data is zero.
    pub const MUTABLE_REF: u32 = 0b0111;

    /// The value is a big integer.
    ///
    /// The extra data is 1 if the integer is negative, 0 otherwise.
    pub const BIG_INTEGER: u32 = 0b1000;
}

/// Reference count of objects owned by a compacted region.
///
/// Such objects are never counted and never individually freed.
/// Live objects always have a reference count of at least one.
pub (crate) const REGION_OWNED: u32 = 0;

/// Header at the start of on-heap data.
///
/// The address of on-heap data never has the least significant bit set.
/// This is further ensured by specifying a minimum alignment greater than 1.
#[repr(C, align(8))]
pub (crate) struct OnHeapHeader
{
    /// The number of references to the value, or [`REGION_OWNED`].
    pub ref_count: AtomicU32,

    /// Extra data and on-heap tag.
    ///
    /// See [`Value::inner`] for more information.
    pub extra_word: u32,
}

impl OnHeapHeader
{
    pub fn tag(&self) -> u32
    {
        self.extra_word & 0b1111
    }

    pub fn extra(&self) -> u32
    {
        self.extra_word >> 4
    }

    pub fn is_region_owned(&self) -> bool
    {
        self.ref_count.load(Relaxed) == REGION_OWNED
    }
}

/// Combine a tag and extra data into an extra word.
pub (crate) fn extra_word(tag: u32, extra: u32) -> u32
{
    debug_assert!(tag <= 0b1111, "Tag must fit in 4 bits");
    debug_assert!(extra < 1 << 28, "Extra data must fit in 28 bits");
    extra << 4 | tag
}

/// Pointer to the payload that immediately follows a header.
///
/// # Safety
///
/// The header must be followed by a payload of type `T`.
pub (crate) unsafe fn payload_ptr<T>(on_heap: NonNull<OnHeapHeader>) -> *mut T
{
    on_heap.as_ptr().add(1).cast()
}

impl Kind
{
    /// The kind corresponding to an on-heap tag, if any.
    pub (crate) fn from_on_heap_tag(tag: u32) -> Option<Self>
    {
        match tag {
            on_heap_tag::CONSTRUCTOR => Some(Self::Constructor),
            on_heap_tag::ARRAY       => Some(Self::Array),
            on_heap_tag::BYTE_ARRAY  => Some(Self::ByteArray),
            on_heap_tag::STRING      => Some(Self::String),
            on_heap_tag::THUNK       => Some(Self::Thunk),
            on_heap_tag::TASK        => Some(Self::Task),
            on_heap_tag::PROMISE     => Some(Self::Promise),
            on_heap_tag::MUTABLE_REF => Some(Self::MutableRef),
            on_heap_tag::BIG_INTEGER => Some(Self::BigInteger),
            _                        => None,
        }
    }
}

/// Returned when an object would be too large to be created.
#[derive(Debug, Error)]
#[error("Object is too large to be created")]
pub struct ObjectSizeError
{
    _priv: (),
}

const OBJECT_SIZE_ERROR: ObjectSizeError = ObjectSizeError{_priv: ()};

// We use synchronized interior mutability for on-heap data.
// Scalars do not use interior mutability.
unsafe impl Send for Value { }
unsafe impl Sync for Value { }

impl Value
{
    /// Create a value from a scalar word.
    ///
    /// The least significant bit must be set.
    unsafe fn from_scalar_word(word: u64) -> Self
    {
        debug_assert!(word & 0b1 == 0b1, "Scalars must be tagged");
        Self{
            inner: NonZeroU64::new_unchecked(word),
            _phantom_data: PhantomData,
        }
    }

    /// Create a value from on-heap data.
    ///
    /// The on-heap data must be properly initialized.
    /// This function will not modify the on-heap data.
    unsafe fn from_on_heap(on_heap: NonNull<OnHeapHeader>) -> Self
    {
        let on_heap = on_heap.as_ptr() as u64;
        debug_assert!(on_heap & 0b1 == 0b0, "On-heap data must be untagged");
        Self{
            inner: NonZeroU64::new_unchecked(on_heap),
            _phantom_data: PhantomData,
        }
    }

    /// Create a value from on-heap data.
    ///
    /// Allocate memory, initialize the on-heap header,
    /// and let `f` initialize the on-heap payload.
    /// `f` must return the extra word to be written to the header.
    ///
    /// If allocation fails, [`handle_alloc_error`] is called, as usual.
    ///
    /// # Safety
    ///
    /// When `f` returns, the payload must be initialized,
    /// and the extra word must be valid as described in [`on_heap_tag`].
    ///
    /// The payload alignment must not be greater than `8`.
    #[inline(always)]
    unsafe fn new_on_heap(
        payload_size: usize,
        payload_align: usize,
        f: impl FnOnce(*mut ()) -> u32,
    ) -> Result<Self, ObjectSizeError>
    {
        // Create allocation layout and check size is not too large.
        let size = size_of::<OnHeapHeader>().checked_add(payload_size)
            .ok_or(OBJECT_SIZE_ERROR)?;
        let layout = Layout::from_size_align(size, align_of::<OnHeapHeader>())
            .map_err(|_| OBJECT_SIZE_ERROR)?;

        // If we allow payload alignment to be larger than header alignment,
        // we need to deal with padding bytes or address adjustment.
        // Both of those are annoying so we just do this instead.
        assert!(
            payload_align <= align_of::<OnHeapHeader>(),
            "Payload alignment is too large",
        );

        // With the std::alloc API, we must pass the layout when deallocating.
        // Objects are freed without knowing their layout, so use malloc.
        let ptr = libc::malloc(layout.size());
        let Some(ptr) = NonNull::new(ptr)
            else { handle_alloc_error(layout); };

        // If anything below panics, deallocate the memory.
        let dealloc_guard = ScopeExit::new(|| {
            libc::free(ptr.as_ptr());
        });

        // Initialize the payload.
        let ptr = ptr.cast::<OnHeapHeader>();
        let payload_ptr = ptr.as_ptr().add(1).cast::<()>();
        let extra_word = f(payload_ptr);

        // Initialize the header.
        let ref_count = AtomicU32::new(1);
        ptr::write(ptr.as_ptr(), OnHeapHeader{ref_count, extra_word});

        dealloc_guard.dismiss();
        Ok(Self::from_on_heap(ptr))
    }

    fn is_scalar_word(&self) -> bool
    {
        self.inner.get() & 0b1 == 0b1
    }

    /// Get the on-heap data, if the value is on-heap.
    fn get_on_heap(&self) -> Option<NonNull<OnHeapHeader>>
    {
        if self.is_scalar_word() {
            None
        } else {
            NonNull::new(self.inner.get() as *mut OnHeapHeader)
        }
    }

    /// Get the on-heap header, if the value is on-heap.
    fn get_on_heap_header(&self) -> Option<&OnHeapHeader>
    {
        // SAFETY: The value keeps the on-heap data alive.
        self.get_on_heap().map(|on_heap| unsafe { &*on_heap.as_ptr() })
    }

    /// The raw word that makes up this value.
    pub (crate) fn as_raw(&self) -> u64
    {
        self.inner.get()
    }

    /// Give up ownership of this value, returning its raw word.
    pub (crate) fn into_raw(self) -> u64
    {
        ManuallyDrop::new(self).inner.get()
    }

    /// Take ownership of a raw word.
    ///
    /// # Safety
    ///
    /// The word must be a valid value word,
    /// and it must own one reference (unless it is region-owned).
    pub (crate) unsafe fn from_raw(raw: u64) -> Self
    {
        debug_assert!(raw != 0, "Value words are never zero");
        Self{
            inner: NonZeroU64::new_unchecked(raw),
            _phantom_data: PhantomData,
        }
    }

    /// Clone the value denoted by a raw word, without taking ownership.
    ///
    /// # Safety
    ///
    /// The word must be a valid value word that is kept alive elsewhere.
    pub (crate) unsafe fn clone_from_raw(raw: u64) -> Self
    {
        let borrowed = ManuallyDrop::new(Self::from_raw(raw));
        (*borrowed).clone()
    }

    /// The kind of this value.
    pub fn kind(&self) -> Kind
    {
        let Some(on_heap) = self.get_on_heap_header()
            else { return Kind::Scalar };
        match Kind::from_on_heap_tag(on_heap.tag()) {
            Some(kind) => kind,
            None => unreachable!("Value has an invalid on-heap tag"),
        }
    }

    /// Whether the value lives in a compacted region.
    ///
    /// Compacted values are not reference counted;
    /// cloning and dropping them does not touch memory.
    /// Scalars are never compacted, as they are not on-heap.
    pub fn is_compacted(&self) -> bool
    {
        self.get_on_heap_header()
            .map_or(false, OnHeapHeader::is_region_owned)
    }

    /// Whether two values are the same object, or the same scalar.
    pub fn ptr_eq(&self, other: &Value) -> bool
    {
        self.inner == other.inner
    }

    /// Decrement the reference count of on-heap data.
    ///
    /// Returns whether this released the last reference,
    /// in which case the caller must free the on-heap data.
    fn release_count(on_heap: &OnHeapHeader) -> bool
    {
        if on_heap.is_region_owned() {
            return false;
        }

        // Implementation taken from Arc::drop.
        if on_heap.ref_count.fetch_sub(1, Release) != 1 {
            return false;
        }
        fence(Acquire);

        true
    }

    /// Call the correct `drop_on_heap_*` method and deallocate memory.
    ///
    /// The `drop_on_heap_*` methods release any contained values
    /// into the given orphans list rather than dropping them,
    /// so that freeing deeply nested values does not recurse.
    ///
    /// This is not inlined, to reduce the size of the drop function.
    /// (The drop function is inlined all over the place.)
    ///
    /// # Safety
    ///
    /// `on_heap` must be allocated by [`new_on_heap`][`Self::new_on_heap`],
    /// and its last reference must have been released.
    #[inline(never)]
    unsafe fn drop_on_heap(on_heap: NonNull<OnHeapHeader>)
    {
        let mut orphans = Orphans(Vec::new());
        let mut next = Some(on_heap);

        while let Some(on_heap) = next.take().or_else(|| orphans.0.pop()) {
            // Free any contained resources.
            let tag = (*on_heap.as_ptr()).tag();
            match tag {
                on_heap_tag::CONSTRUCTOR =>
                    Self::drop_on_heap_constructor(on_heap, &mut orphans),
                on_heap_tag::ARRAY =>
                    Self::drop_on_heap_array(on_heap, &mut orphans),
                on_heap_tag::BYTE_ARRAY => (),
                on_heap_tag::STRING => (),
                on_heap_tag::THUNK =>
                    Self::drop_on_heap_thunk(on_heap, &mut orphans),
                on_heap_tag::TASK | on_heap_tag::PROMISE =>
                    Self::drop_on_heap_cell(on_heap, &mut orphans),
                on_heap_tag::MUTABLE_REF =>
                    Self::drop_on_heap_mutable_ref(on_heap, &mut orphans),
                on_heap_tag::BIG_INTEGER =>
                    Self::drop_on_heap_big_integer(on_heap),
                _ => unreachable!("Value has an invalid on-heap tag"),
            }

            // Free the memory occupied by the on-heap data.
            libc::free(on_heap.as_ptr().cast());
        }
    }
}

/// On-heap data whose last reference was released while dropping a value.
pub (crate) struct Orphans(Vec<NonNull<OnHeapHeader>>);

impl Orphans
{
    /// Release a value, queueing it if that was its last reference.
    pub fn release(&mut self, value: Value)
    {
        let value = ManuallyDrop::new(value);
        if let Some(on_heap) = value.get_on_heap() {
            // SAFETY: The value keeps the on-heap data alive.
            if Value::release_count(unsafe { on_heap.as_ref() }) {
                self.0.push(on_heap);
            }
        }
    }

    /// Release a raw word, where zero means absent.
    ///
    /// # Safety
    ///
    /// A non-zero word must own a reference.
    pub unsafe fn release_raw(&mut self, raw: u64)
    {
        if raw != 0 {
            self.release(Value::from_raw(raw));
        }
    }
}

impl Clone for Value
{
    fn clone(&self) -> Self
    {
        if let Some(on_heap) = self.get_on_heap_header() {
            if !on_heap.is_region_owned() {
                // Implementation taken from Arc::clone.
                let old_size = on_heap.ref_count.fetch_add(1, Relaxed);
                if old_size > i32::MAX as u32 {
                    abort();
                }
            }
        }
        Self{inner: self.inner, _phantom_data: PhantomData}
    }
}

impl Drop for Value
{
    fn drop(&mut self)
    {
        if let Some(on_heap) = self.get_on_heap() {
            // SAFETY: The value keeps the on-heap data alive.
            if Self::release_count(unsafe { on_heap.as_ref() }) {
                // SAFETY: On-heap data is no longer going to be used.
                unsafe { Self::drop_on_heap(on_heap); }
            }
        }
    }
}

impl fmt::Debug for Value
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        // For convenience, scalar and on-heap values
        // are formatted with different letter case.
        // We explicitly *do not* want to use f.debug_tuple,
        // as that would insert noisy newlines with {:#?}.
        if self.is_scalar_word() {
            write!(f, "Value({:#016X})", self.inner.get())
        } else {
            write!(f, "Value({:#016x})", self.inner.get())
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn header_layout()
    {
        assert_eq!(size_of::<OnHeapHeader>(), 8);
        assert_eq!(align_of::<OnHeapHeader>(), 8);
        assert_eq!(size_of::<Value>(), 8);
        assert_eq!(size_of::<Option<Value>>(), 8);
    }

    #[test]
    fn clone_and_drop_count_references()
    {
        let value = Value::string_from_bytes(b"counted").unwrap();
        let header = value.get_on_heap_header().unwrap();
        assert_eq!(header.ref_count.load(Relaxed), 1);

        let clone = value.clone();
        assert_eq!(header.ref_count.load(Relaxed), 2);
        assert!(clone.ptr_eq(&value));

        drop(clone);
        assert_eq!(header.ref_count.load(Relaxed), 1);
    }

    #[test]
    fn kinds()
    {
        let scalar = Value::scalar_from_u8(3);
        let string = Value::string_from_bytes(b"").unwrap();
        let array = Value::array(vec![scalar.clone(), string.clone()]).unwrap();
        assert_eq!(scalar.kind(), Kind::Scalar);
        assert_eq!(string.kind(), Kind::String);
        assert_eq!(array.kind(), Kind::Array);
        assert!(!array.is_compacted());
    }

    #[test]
    fn dropping_long_chain_does_not_overflow_stack()
    {
        let mut chain = Value::scalar_from_u8(0);
        for _ in 0 .. 1_000_000 {
            chain = Value::constructor(1, vec![chain], &[]).unwrap();
        }
        drop(chain);
    }
}
