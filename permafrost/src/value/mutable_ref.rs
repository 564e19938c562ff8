use {
    super::{
        OnHeapHeader,
        Orphans,
        Val,
        Value,
        extra_word,
        on_heap_tag,
        payload_ptr,
    },
    scope_exit::ScopeExit,
    std::{
        hint::spin_loop,
        mem::{align_of, size_of},
        ptr::{NonNull, addr_of, addr_of_mut},
        sync::atomic::{AtomicU32, AtomicU64, Ordering::{Acquire, Relaxed, Release}},
    },
    thiserror::Error,
};

/// Representation of on-heap mutable references.
#[repr(C)]
pub (crate) struct OnHeapMutableRef
{
    /// Held while the contents are cloned or replaced.
    pub lock: AtomicU32,
    pub _pad: u32,

    /// The raw word of the current contents.
    pub value: AtomicU64,
}

/// Returned when setting a mutable reference that was compacted.
///
/// Compacted mutable references hold a snapshot and cannot be set.
#[derive(Debug, Error)]
#[error("Mutable reference is compacted and cannot be set")]
pub struct FrozenRefError
{
    /// The value that was not stored.
    pub value: Value,
}

impl OnHeapMutableRef
{
    /// Run `f` on the contents while holding the lock.
    fn with_lock<R>(&self, f: impl FnOnce(&AtomicU64) -> R) -> R
    {
        while self.lock.compare_exchange_weak(0, 1, Acquire, Relaxed).is_err() {
            spin_loop();
        }
        let _unlock = ScopeExit::new(|| self.lock.store(0, Release));
        f(&self.value)
    }
}

/// Working with mutable reference values.
impl Value
{
    /// Create a mutable reference with the given initial contents.
    pub fn mutable_ref(value: Value) -> Self
    {
        let raw = value.into_raw();

        let init_payload = |payload: *mut ()| unsafe {
            let payload = payload.cast::<OnHeapMutableRef>();
            addr_of_mut!((*payload).lock).write(AtomicU32::new(0));
            addr_of_mut!((*payload)._pad).write(0);
            addr_of_mut!((*payload).value).write(AtomicU64::new(raw));
            extra_word(on_heap_tag::MUTABLE_REF, 0)
        };

        // SAFETY: init_payload initializes the entire payload.
        let result = unsafe {
            Self::new_on_heap(
                size_of::<OnHeapMutableRef>(),
                align_of::<OnHeapMutableRef>(),
                init_payload,
            )
        };

        result.unwrap_or_else(|_| unreachable!("Mutable refs have a fixed size"))
    }

    fn mutable_ref_on_heap(&self) -> NonNull<OnHeapHeader>
    {
        match self.get_on_heap_header() {
            Some(on_heap) if on_heap.tag() == on_heap_tag::MUTABLE_REF =>
                NonNull::from(on_heap),
            _ => panic!("Value of kind {:?} is not a mutable ref", self.kind()),
        }
    }

    /// Clone the current contents of a mutable reference.
    ///
    /// # Safety
    ///
    /// The on-heap data must be a live or compacted mutable reference.
    unsafe fn load_mutable_ref(on_heap: NonNull<OnHeapHeader>) -> Value
    {
        let payload = &*payload_ptr::<OnHeapMutableRef>(on_heap);
        if (*on_heap.as_ptr()).is_region_owned() {
            // Compacted contents never change.
            return Self::clone_from_raw(payload.value.load(Relaxed));
        }
        // The lock keeps the contents from being released.
        payload.with_lock(|v| Self::clone_from_raw(v.load(Relaxed)))
    }

    /// The current contents of a mutable reference.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a mutable reference.
    pub fn mutable_ref_get(&self) -> Value
    {
        let on_heap = self.mutable_ref_on_heap();
        // SAFETY: The value keeps the on-heap data alive.
        unsafe { Self::load_mutable_ref(on_heap) }
    }

    /// Replace the contents of a mutable reference.
    ///
    /// Returns the previous contents.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a mutable reference.
    pub fn mutable_ref_set(&self, value: Value) -> Result<Value, FrozenRefError>
    {
        let on_heap = self.mutable_ref_on_heap();
        // SAFETY: The value keeps the on-heap data alive.
        let (header, payload) = unsafe {
            (on_heap.as_ref(), &*payload_ptr::<OnHeapMutableRef>(on_heap))
        };
        if header.is_region_owned() {
            return Err(FrozenRefError{value});
        }
        let raw = value.into_raw();
        let old = payload.with_lock(|v| v.swap(raw, Relaxed));
        // SAFETY: The slot owned the reference to the old contents.
        Ok(unsafe { Self::from_raw(old) })
    }

    /// See [`Self::borrow_on_heap`].
    pub (super) unsafe fn borrow_on_heap_mutable_ref<'a>(
        on_heap: NonNull<OnHeapHeader>,
    ) -> Val<'a>
    {
        Val::MutableRef(Self::load_mutable_ref(on_heap))
    }

    /// See [`Self::drop_on_heap`].
    pub (super) unsafe fn drop_on_heap_mutable_ref(
        on_heap: NonNull<OnHeapHeader>,
        orphans: &mut Orphans,
    )
    {
        let payload = payload_ptr::<OnHeapMutableRef>(on_heap);
        orphans.release_raw((*addr_of!((*payload).value)).load(Relaxed));
    }
}
