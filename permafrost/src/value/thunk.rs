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
    std::{
        mem::{align_of, size_of},
        ptr::{NonNull, addr_of, addr_of_mut},
        sync::atomic::{AtomicU64, Ordering::{AcqRel, Acquire, Relaxed}},
    },
};

/// Representation of on-heap thunks.
#[repr(C)]
pub (crate) struct OnHeapThunk
{
    /// The raw word of the cached value, or zero if unforced.
    pub value: AtomicU64,

    /// The raw word of the suspended computation, or zero if none.
    ///
    /// This never changes, and is released along with the thunk.
    pub closure: AtomicU64,
}

/// Working with thunk values.
///
/// A thunk caches the result of a lazy computation.
/// Running the computation is up to the caller;
/// the thunk only records its closure and, eventually, its result.
impl Value
{
    /// Create an unforced thunk for the given closure.
    pub fn thunk(closure: Value) -> Self
    {
        Self::new_thunk(0, closure.into_raw())
    }

    /// Create a thunk that is already forced.
    pub fn thunk_forced(value: Value) -> Self
    {
        Self::new_thunk(value.into_raw(), 0)
    }

    fn new_thunk(value: u64, closure: u64) -> Self
    {
        let init_payload = |payload: *mut ()| unsafe {
            let payload = payload.cast::<OnHeapThunk>();
            addr_of_mut!((*payload).value).write(AtomicU64::new(value));
            addr_of_mut!((*payload).closure).write(AtomicU64::new(closure));
            extra_word(on_heap_tag::THUNK, 0)
        };

        // SAFETY: init_payload initializes the entire payload.
        let result = unsafe {
            Self::new_on_heap(
                size_of::<OnHeapThunk>(),
                align_of::<OnHeapThunk>(),
                init_payload,
            )
        };

        result.unwrap_or_else(|_| unreachable!("Thunks have a fixed size"))
    }

    fn thunk_payload(&self) -> &OnHeapThunk
    {
        match self.get_on_heap() {
            // SAFETY: The value keeps the on-heap data alive,
            //         and the tag says this is a thunk.
            Some(on_heap) if unsafe { on_heap.as_ref() }.tag()
                             == on_heap_tag::THUNK =>
                unsafe { &*payload_ptr::<OnHeapThunk>(on_heap) },
            _ => panic!("Value of kind {:?} is not a thunk", self.kind()),
        }
    }

    /// Record the result of forcing a thunk.
    ///
    /// If the thunk was already forced, the value is handed back.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a thunk.
    pub fn thunk_force(&self, value: Value) -> Result<(), Value>
    {
        let payload = self.thunk_payload();

        let raw = value.as_raw();
        if payload.value.compare_exchange(0, raw, AcqRel, Acquire).is_err() {
            return Err(value);
        }
        value.into_raw();
        Ok(())
    }

    /// The closure of an unforced thunk.
    ///
    /// Returns [`None`] once the thunk has been forced.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a thunk.
    pub fn thunk_closure(&self) -> Option<Value>
    {
        let payload = self.thunk_payload();
        if payload.value.load(Acquire) != 0 {
            return None;
        }
        match payload.closure.load(Relaxed) {
            0 => None,
            // SAFETY: The thunk keeps the closure alive.
            raw => Some(unsafe { Self::clone_from_raw(raw) }),
        }
    }

    /// See [`Self::borrow_on_heap`].
    pub (super) unsafe fn borrow_on_heap_thunk<'a>(
        on_heap: NonNull<OnHeapHeader>,
    ) -> Val<'a>
    {
        let payload = payload_ptr::<OnHeapThunk>(on_heap);
        match (*addr_of!((*payload).value)).load(Acquire) {
            0 => Val::Thunk(None),
            // SAFETY: Forced thunks never change, so the thunk keeps it alive.
            raw => Val::Thunk(Some(Self::clone_from_raw(raw))),
        }
    }

    /// See [`Self::drop_on_heap`].
    pub (super) unsafe fn drop_on_heap_thunk(
        on_heap: NonNull<OnHeapHeader>,
        orphans: &mut Orphans,
    )
    {
        let payload = payload_ptr::<OnHeapThunk>(on_heap);
        orphans.release_raw((*addr_of!((*payload).value)).load(Relaxed));
        orphans.release_raw((*addr_of!((*payload).closure)).load(Relaxed));
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn force_once()
    {
        let closure = Value::string_from_bytes(b"compute").unwrap();
        let thunk = Value::thunk(closure.clone());
        assert!(matches!(thunk.borrow(), Val::Thunk(None)));
        assert!(thunk.thunk_closure().unwrap().ptr_eq(&closure));

        thunk.thunk_force(Value::scalar_from_u8(42)).unwrap();
        assert!(thunk.thunk_force(Value::scalar_from_u8(43)).is_err());
        assert!(thunk.thunk_closure().is_none());

        match thunk.borrow() {
            Val::Thunk(Some(value)) =>
                assert!(matches!(value.borrow(), Val::Scalar(42))),
            other => panic!("Unexpected val: {:?}", other),
        }

        // The closure is released along with the thunk.
        let header = closure.get_on_heap_header().unwrap();
        assert_eq!(header.ref_count.load(Relaxed), 2);
        drop(thunk);
        assert_eq!(header.ref_count.load(Relaxed), 1);
    }

    #[test]
    fn forced_thunk_has_no_closure()
    {
        let thunk = Value::thunk_forced(Value::scalar_from_bool(true));
        assert!(thunk.thunk_closure().is_none());
        assert!(matches!(thunk.borrow(), Val::Thunk(Some(_))));
    }

    #[test]
    #[should_panic(expected = "is not a thunk")]
    fn force_non_thunk()
    {
        let _ = Value::scalar_from_u8(0).thunk_force(Value::scalar_from_u8(0));
    }
}
