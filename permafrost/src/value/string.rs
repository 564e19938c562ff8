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
        mem::{MaybeUninit, align_of, size_of},
        ptr::{NonNull, addr_of, addr_of_mut},
        slice,
    },
};

/// Representation of on-heap strings.
#[repr(C)]
pub (crate) struct OnHeapString
{
    pub len: usize,
    pub bytes: [u8; 0 /* self.len + 1 */],
}

/// Size of a string payload including the terminating nul,
/// or [`None`] on overflow.
pub (crate) fn string_payload_size(len: usize) -> Option<usize>
{
    size_of::<OnHeapString>()
        .checked_add(len)?
        .checked_add(1)
}

/// Working with string values.
impl Value
{
    /// Create a string from the bytes that make it up.
    ///
    /// The bytes must not include the terminating nul;
    /// it will be added automatically by this method.
    pub fn string_from_bytes(bytes: &[u8]) -> Result<Self, ObjectSizeError>
    {
        // SAFETY: The function initializes the buffer.
        unsafe {
            Self::string_from_fn(bytes.len(), |buf| {
                let src = slice::from_raw_parts(
                    bytes.as_ptr().cast::<MaybeUninit<u8>>(),
                    bytes.len(),
                );
                buf.copy_from_slice(src);
            })
        }
    }

    /// Create a string using a function that initializes it.
    ///
    /// Memory is allocated for the string,
    /// which the given function must initialize.
    /// The function must not write the terminating nul;
    /// it will be added automatically by this method.
    ///
    /// # Safety
    ///
    /// When the given function returns,
    /// the entire buffer must be initialized.
    pub unsafe fn string_from_fn<F>(len: usize, f: F)
        -> Result<Self, ObjectSizeError>
        where F: FnOnce(&mut [MaybeUninit<u8>])
    {
        let payload_size = string_payload_size(len).ok_or(OBJECT_SIZE_ERROR)?;
        let payload_align = align_of::<OnHeapString>();

        // Initialize the payload of the string value.
        let init_payload = |payload: *mut ()| {
            let payload = payload.cast::<OnHeapString>();

            // Initialize the len field.
            addr_of_mut!((*payload).len).write(len);

            // Initialize the bytes and terminating nul.
            let bytes = addr_of_mut!((*payload).bytes).cast::<MaybeUninit<u8>>();
            let bytes = slice::from_raw_parts_mut(bytes, len + 1);
            f(&mut bytes[0 .. len]);
            bytes[len].write(0);

            // Return the extra word.
            extra_word(on_heap_tag::STRING, 0)
        };

        // Allocate memory for the string value and initialize it.
        Self::new_on_heap(payload_size, payload_align, init_payload)
    }

    /// See [`Self::borrow_on_heap`].
    pub (super) unsafe fn borrow_on_heap_string<'a>(
        on_heap: NonNull<OnHeapHeader>,
    ) -> Val<'a>
    {
        let payload = payload_ptr::<OnHeapString>(on_heap);
        let bytes = slice::from_raw_parts(
            addr_of!((*payload).bytes).cast::<u8>(),
            (*payload).len,
        );
        Val::String(bytes)
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        proptest::{
            collection::vec as pvec,
            num::u8::ANY as pu8,
            proptest,
        },
    };

    #[test]
    fn terminating_nul()
    {
        let value = Value::string_from_bytes(b"abc").unwrap();
        let on_heap = value.get_on_heap().unwrap();
        unsafe {
            let payload = payload_ptr::<OnHeapString>(on_heap);
            let bytes = addr_of!((*payload).bytes).cast::<u8>();
            assert_eq!(*bytes.add(3), 0);
        }
    }

    proptest!
    {
        #[test]
        fn roundtrip(expected in pvec(pu8, 0 .. 100))
        {
            let value = Value::string_from_bytes(&expected).unwrap();
            match value.borrow() {
                Val::String(bytes) => assert_eq!(bytes, &expected[..]),
                other => panic!("Unexpected val: {:?}", other),
            }
        }
    }
}
