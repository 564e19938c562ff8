use {
    crate::integer::Int,
    super::{
        OBJECT_SIZE_ERROR,
        ObjectSizeError,
        OnHeapHeader,
        Val,
        Value,
        extra_word,
        on_heap_tag,
        payload_ptr,
    },
    scope_exit::ScopeExit,
    std::{
        alloc::{Layout, handle_alloc_error},
        mem::{align_of, size_of},
        ptr::{self, NonNull, addr_of, addr_of_mut},
        slice,
    },
};

/// Representation of on-heap big integers.
///
/// The sign is stored in the extra data of the header.
#[repr(C)]
pub (crate) struct OnHeapBigInteger
{
    /// Address of the limbs.
    ///
    /// Live big integers own a separate allocation for their limbs,
    /// unless there are none, in which case this is dangling.
    /// Compacted big integers store their limbs right after this struct.
    pub limbs: u64,

    /// Number of limbs.
    pub len: usize,
}

/// Working with big integer values.
impl Value
{
    /// Create a big integer from its sign and magnitude.
    ///
    /// The limbs are little-endian, least significant limb first.
    /// Trailing zero limbs are removed, and zero is never negative.
    pub fn big_integer(negative: bool, limbs: &[u64])
        -> Result<Self, ObjectSizeError>
    {
        let len = limbs.iter().rposition(|&limb| limb != 0).map_or(0, |i| i + 1);
        let limbs = &limbs[.. len];
        let negative = negative && len != 0;

        let layout = Layout::array::<u64>(len).map_err(|_| OBJECT_SIZE_ERROR)?;

        // The limbs are freed without knowing their layout, so use malloc.
        let data = if len == 0 {
            NonNull::<u64>::dangling()
        } else {
            // SAFETY: The layout has a non-zero size.
            let ptr = unsafe { libc::malloc(layout.size()) };
            let Some(ptr) = NonNull::new(ptr.cast::<u64>())
                else { handle_alloc_error(layout); };
            // SAFETY: The allocation is large enough for the limbs.
            unsafe { ptr::copy_nonoverlapping(limbs.as_ptr(), ptr.as_ptr(), len); }
            ptr
        };

        // If creating the value fails, deallocate the limbs.
        let dealloc_guard = ScopeExit::new(|| {
            if len != 0 {
                // SAFETY: The limbs were allocated above.
                unsafe { libc::free(data.as_ptr().cast()); }
            }
        });

        let init_payload = |payload: *mut ()| unsafe {
            let payload = payload.cast::<OnHeapBigInteger>();
            addr_of_mut!((*payload).limbs).write(data.as_ptr() as u64);
            addr_of_mut!((*payload).len).write(len);
            extra_word(on_heap_tag::BIG_INTEGER, u32::from(negative))
        };

        // SAFETY: init_payload initializes the entire payload.
        let value = unsafe {
            Self::new_on_heap(
                size_of::<OnHeapBigInteger>(),
                align_of::<OnHeapBigInteger>(),
                init_payload,
            )?
        };

        dealloc_guard.dismiss();
        Ok(value)
    }

    /// See [`Self::borrow_on_heap`].
    pub (super) unsafe fn borrow_on_heap_big_integer<'a>(
        on_heap: NonNull<OnHeapHeader>,
    ) -> Val<'a>
    {
        let negative = (*on_heap.as_ptr()).extra() == 1;
        let payload = payload_ptr::<OnHeapBigInteger>(on_heap);
        let limbs = slice::from_raw_parts(
            *addr_of!((*payload).limbs) as *const u64,
            *addr_of!((*payload).len),
        );
        Val::BigInteger(Int{negative, limbs})
    }

    /// See [`Self::drop_on_heap`].
    pub (super) unsafe fn drop_on_heap_big_integer(
        on_heap: NonNull<OnHeapHeader>,
    )
    {
        let payload = payload_ptr::<OnHeapBigInteger>(on_heap);
        if *addr_of!((*payload).len) != 0 {
            libc::free(*addr_of!((*payload).limbs) as *mut libc::c_void);
        }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        proptest::{collection::vec as pvec, num::u64::ANY as pu64, proptest},
    };

    #[test]
    fn normalized()
    {
        let value = Value::big_integer(true, &[0, 0]).unwrap();
        match value.borrow() {
            Val::BigInteger(int) => {
                assert!(int.is_zero());
                assert!(!int.negative);
            },
            other => panic!("Unexpected val: {:?}", other),
        }

        let value = Value::big_integer(true, &[7, 0, 0]).unwrap();
        match value.borrow() {
            Val::BigInteger(int) => assert_eq!(int.to_i128(), Some(-7)),
            other => panic!("Unexpected val: {:?}", other),
        }
    }

    proptest!
    {
        #[test]
        fn roundtrip(negative: bool, mut limbs in pvec(pu64, 0 .. 16))
        {
            let value = Value::big_integer(negative, &limbs).unwrap();
            while limbs.last() == Some(&0) {
                limbs.pop();
            }
            match value.borrow() {
                Val::BigInteger(int) => {
                    assert_eq!(int.limbs, &limbs[..]);
                    assert_eq!(int.negative, negative && !limbs.is_empty());
                },
                other => panic!("Unexpected val: {:?}", other),
            }
        }
    }
}
