use {
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
    std::{
        mem::{align_of, size_of},
        ptr::{self, NonNull, addr_of, addr_of_mut},
        slice,
    },
};

/// Representation of on-heap byte arrays.
///
/// The element size is stored in the extra data of the header.
#[repr(C)]
pub (crate) struct OnHeapByteArray
{
    /// Number of elements, not bytes.
    pub len: usize,
    pub bytes: [u8; 0 /* self.len * elem_size */],
}

/// Size of a byte array payload, or [`None`] on overflow.
pub (crate) fn byte_array_payload_size(num_bytes: usize) -> Option<usize>
{
    size_of::<OnHeapByteArray>().checked_add(num_bytes)
}

/// Working with byte array values.
impl Value
{
    /// Create an array of unboxed elements of `elem_size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `elem_size` is zero,
    /// or if the number of bytes is not a multiple of it.
    pub fn byte_array(elem_size: u8, bytes: &[u8])
        -> Result<Self, ObjectSizeError>
    {
        assert!(elem_size != 0, "Element size must not be zero");
        assert!(
            bytes.len() % usize::from(elem_size) == 0,
            "Byte count must be a multiple of the element size",
        );

        let len = bytes.len() / usize::from(elem_size);
        let payload_size = byte_array_payload_size(bytes.len())
            .ok_or(OBJECT_SIZE_ERROR)?;
        let payload_align = align_of::<OnHeapByteArray>();

        let init_payload = |payload: *mut ()| unsafe {
            let payload = payload.cast::<OnHeapByteArray>();
            addr_of_mut!((*payload).len).write(len);
            let dst = addr_of_mut!((*payload).bytes).cast::<u8>();
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            extra_word(on_heap_tag::BYTE_ARRAY, u32::from(elem_size))
        };

        // SAFETY: init_payload initializes the entire payload.
        unsafe { Self::new_on_heap(payload_size, payload_align, init_payload) }
    }

    /// See [`Self::borrow_on_heap`].
    pub (super) unsafe fn borrow_on_heap_byte_array<'a>(
        on_heap: NonNull<OnHeapHeader>,
    ) -> Val<'a>
    {
        // The extra data was created from a u8.
        let elem_size = (*on_heap.as_ptr()).extra() as u8;
        let payload = payload_ptr::<OnHeapByteArray>(on_heap);
        let bytes = slice::from_raw_parts(
            addr_of!((*payload).bytes).cast::<u8>(),
            (*payload).len * usize::from(elem_size),
        );
        Val::ByteArray{elem_size, bytes}
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        proptest::{collection::vec as pvec, num::u8::ANY as pu8, proptest},
    };

    #[test]
    #[should_panic(expected = "multiple of the element size")]
    fn ragged_bytes()
    {
        let _ = Value::byte_array(4, &[0; 6]);
    }

    #[test]
    fn element_count()
    {
        let value = Value::byte_array(4, &[0xAA; 12]).unwrap();
        let on_heap = value.get_on_heap().unwrap();
        let len = unsafe { (*payload_ptr::<OnHeapByteArray>(on_heap)).len };
        assert_eq!(len, 3);
    }

    proptest!
    {
        #[test]
        fn roundtrip(elem_size in 1 ..= 8u8, elems in pvec(pu8, 0 .. 32))
        {
            let expected: Vec<u8> = elems.iter()
                .flat_map(|&b| std::iter::repeat(b).take(elem_size.into()))
                .collect();
            let value = Value::byte_array(elem_size, &expected).unwrap();
            match value.borrow() {
                Val::ByteArray{elem_size: actual_size, bytes} => {
                    assert_eq!(actual_size, elem_size);
                    assert_eq!(bytes, &expected[..]);
                },
                other => panic!("Unexpected val: {:?}", other),
            }
        }
    }
}
