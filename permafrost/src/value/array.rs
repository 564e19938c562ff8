use {
    super::{
        OBJECT_SIZE_ERROR,
        ObjectSizeError,
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
        ptr::{self, NonNull, addr_of, addr_of_mut},
        slice,
    },
};

/// Representation of on-heap arrays.
#[repr(C)]
pub (crate) struct OnHeapArray
{
    pub len: usize,
    pub elements: [Value; 0 /* self.len */],
}

/// Size of an array payload, or [`None`] on overflow.
pub (crate) fn array_payload_size(len: usize) -> Option<usize>
{
    len.checked_mul(size_of::<Value>())?
        .checked_add(size_of::<OnHeapArray>())
}

/// Working with array values.
impl Value
{
    /// Create an array from the given elements.
    pub fn array(mut elements: Vec<Value>) -> Result<Self, ObjectSizeError>
    {
        let len = elements.len();
        let payload_size = array_payload_size(len).ok_or(OBJECT_SIZE_ERROR)?;
        let payload_align = align_of::<OnHeapArray>();

        let init_payload = |payload: *mut ()| unsafe {
            let payload = payload.cast::<OnHeapArray>();
            addr_of_mut!((*payload).len).write(len);

            // Move the elements out of the vector.
            let dst = addr_of_mut!((*payload).elements).cast::<Value>();
            ptr::copy_nonoverlapping(elements.as_ptr(), dst, len);
            elements.set_len(0);

            extra_word(on_heap_tag::ARRAY, 0)
        };

        // SAFETY: init_payload initializes the entire payload.
        unsafe { Self::new_on_heap(payload_size, payload_align, init_payload) }
    }

    /// See [`Self::borrow_on_heap`].
    pub (super) unsafe fn borrow_on_heap_array<'a>(
        on_heap: NonNull<OnHeapHeader>,
    ) -> Val<'a>
    {
        let payload = payload_ptr::<OnHeapArray>(on_heap);
        let elements = slice::from_raw_parts(
            addr_of!((*payload).elements).cast::<Value>(),
            (*payload).len,
        );
        Val::Array(elements)
    }

    /// See [`Self::drop_on_heap`].
    pub (super) unsafe fn drop_on_heap_array(
        on_heap: NonNull<OnHeapHeader>,
        orphans: &mut Orphans,
    )
    {
        let payload = payload_ptr::<OnHeapArray>(on_heap);
        let elements = addr_of_mut!((*payload).elements).cast::<Value>();
        for i in 0 .. (*payload).len {
            orphans.release(ptr::read(elements.add(i)));
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::{collection::vec as pvec, proptest}};

    #[test]
    fn empty()
    {
        let value = Value::array(Vec::new()).unwrap();
        assert!(matches!(value.borrow(), Val::Array([])));
    }

    #[test]
    fn nested_arrays_share_elements()
    {
        let inner = Value::array(vec![Value::scalar_from_u8(1)]).unwrap();
        let outer = Value::array(vec![inner.clone(), inner.clone()]).unwrap();
        match outer.borrow() {
            Val::Array([a, b]) => {
                assert!(a.ptr_eq(&inner));
                assert!(b.ptr_eq(&inner));
            },
            other => panic!("Unexpected val: {:?}", other),
        }
    }

    proptest!
    {
        #[test]
        fn roundtrip(payloads in pvec(0 .. 1u64 << 40, 0 .. 50))
        {
            let elements = payloads.iter()
                .map(|&p| Value::scalar(p).unwrap())
                .collect();
            let value = Value::array(elements).unwrap();
            match value.borrow() {
                Val::Array(elements) => {
                    let actual: Vec<u64> = elements.iter()
                        .map(|e| match e.borrow() {
                            Val::Scalar(p) => p,
                            other => panic!("Unexpected val: {:?}", other),
                        })
                        .collect();
                    assert_eq!(actual, payloads);
                },
                other => panic!("Unexpected val: {:?}", other),
            }
        }
    }
}
