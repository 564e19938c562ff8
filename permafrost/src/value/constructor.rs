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

/// Representation of on-heap constructors.
#[repr(C)]
pub (crate) struct OnHeapConstructor
{
    pub num_fields: usize,
    pub scalar_size: usize,
    pub fields: [Value; 0 /* self.num_fields */],
    // Followed by self.scalar_size bytes of unboxed scalar data.
}

/// Size of a constructor payload, or [`None`] on overflow.
pub (crate) fn constructor_payload_size(num_fields: usize, scalar_size: usize)
    -> Option<usize>
{
    num_fields.checked_mul(size_of::<Value>())?
        .checked_add(scalar_size)?
        .checked_add(size_of::<OnHeapConstructor>())
}

/// Working with constructor values.
impl Value
{
    /// Create a constructor with the given tag.
    ///
    /// The fields are moved into the constructor, in order.
    /// The scalar bytes are unboxed data stored after the fields.
    pub fn constructor(tag: u16, mut fields: Vec<Value>, scalars: &[u8])
        -> Result<Self, ObjectSizeError>
    {
        let num_fields = fields.len();
        let scalar_size = scalars.len();

        let payload_size = constructor_payload_size(num_fields, scalar_size)
            .ok_or(OBJECT_SIZE_ERROR)?;
        let payload_align = align_of::<OnHeapConstructor>();

        // Initialize the payload of the constructor value.
        let init_payload = |payload: *mut ()| unsafe {
            let payload = payload.cast::<OnHeapConstructor>();
            addr_of_mut!((*payload).num_fields).write(num_fields);
            addr_of_mut!((*payload).scalar_size).write(scalar_size);

            // Move the fields out of the vector.
            let dst = addr_of_mut!((*payload).fields).cast::<Value>();
            ptr::copy_nonoverlapping(fields.as_ptr(), dst, num_fields);
            fields.set_len(0);

            let dst = dst.add(num_fields).cast::<u8>();
            ptr::copy_nonoverlapping(scalars.as_ptr(), dst, scalar_size);

            extra_word(on_heap_tag::CONSTRUCTOR, u32::from(tag))
        };

        // SAFETY: init_payload initializes the entire payload.
        unsafe { Self::new_on_heap(payload_size, payload_align, init_payload) }
    }

    /// Replace a field of a constructor, returning the old field.
    ///
    /// Constructors are otherwise immutable; this exists for tying knots.
    /// To create a constructor that refers to itself,
    /// create it with a placeholder field and then replace that field.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a live constructor,
    /// or if the index is out of bounds.
    ///
    /// # Safety
    ///
    /// No borrows of the constructor's fields may exist,
    /// and no other thread may access the constructor concurrently.
    pub unsafe fn constructor_set_field(&self, index: usize, value: Value)
        -> Value
    {
        let on_heap = match self.get_on_heap_header() {
            Some(on_heap) if on_heap.tag() == on_heap_tag::CONSTRUCTOR
                          && !on_heap.is_region_owned() => on_heap,
            _ => panic!("Value is not a live constructor"),
        };

        let payload = payload_ptr::<OnHeapConstructor>(NonNull::from(on_heap));
        assert!(index < (*payload).num_fields, "Field index out of bounds");

        let fields = addr_of_mut!((*payload).fields).cast::<Value>();
        ptr::replace(fields.add(index), value)
    }

    /// See [`Self::borrow_on_heap`].
    pub (super) unsafe fn borrow_on_heap_constructor<'a>(
        on_heap: NonNull<OnHeapHeader>,
    ) -> Val<'a>
    {
        // The extra data was created from a u16.
        let tag = (*on_heap.as_ptr()).extra() as u16;

        let payload = payload_ptr::<OnHeapConstructor>(on_heap);
        let num_fields = (*payload).num_fields;
        let scalar_size = (*payload).scalar_size;

        let fields = addr_of!((*payload).fields).cast::<Value>();
        let scalars = fields.add(num_fields).cast::<u8>();

        Val::Constructor{
            tag,
            fields: slice::from_raw_parts(fields, num_fields),
            scalars: slice::from_raw_parts(scalars, scalar_size),
        }
    }

    /// See [`Self::drop_on_heap`].
    pub (super) unsafe fn drop_on_heap_constructor(
        on_heap: NonNull<OnHeapHeader>,
        orphans: &mut Orphans,
    )
    {
        let payload = payload_ptr::<OnHeapConstructor>(on_heap);
        let fields = addr_of_mut!((*payload).fields).cast::<Value>();
        for i in 0 .. (*payload).num_fields {
            orphans.release(ptr::read(fields.add(i)));
        }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        proptest::{collection::vec as pvec, num::u8::ANY as pu8, proptest},
    };

    proptest!
    {
        #[test]
        fn roundtrip(
            tag: u16,
            payloads in pvec(0 .. 1_000_000u64, 0 .. 20),
            expected_scalars in pvec(pu8, 0 .. 40),
        )
        {
            let fields = payloads.iter()
                .map(|&p| Value::scalar(p).unwrap())
                .collect();
            let value = Value::constructor(tag, fields, &expected_scalars)
                .unwrap();
            match value.borrow() {
                Val::Constructor{tag: actual_tag, fields, scalars} => {
                    assert_eq!(actual_tag, tag);
                    assert_eq!(scalars, &expected_scalars[..]);
                    assert_eq!(fields.len(), payloads.len());
                    for (field, &payload) in fields.iter().zip(&payloads) {
                        assert!(matches!(field.borrow(), Val::Scalar(p) if p == payload));
                    }
                },
                other => panic!("Unexpected val: {:?}", other),
            }
        }
    }

    #[test]
    fn fields_are_released_on_drop()
    {
        let string = Value::string_from_bytes(b"shared").unwrap();
        let value = Value::constructor(0, vec![string.clone()], &[]).unwrap();
        let header = string.get_on_heap_header().unwrap();
        assert_eq!(header.ref_count.load(std::sync::atomic::Ordering::Relaxed), 2);
        drop(value);
        assert_eq!(header.ref_count.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn set_field_ties_knot()
    {
        let node = Value::constructor(7, vec![Value::scalar_from_u8(0)], &[])
            .unwrap();
        unsafe {
            let old = node.constructor_set_field(0, node.clone());
            assert!(matches!(old.borrow(), Val::Scalar(0)));
        }
        match node.borrow() {
            Val::Constructor{fields, ..} => assert!(fields[0].ptr_eq(&node)),
            other => panic!("Unexpected val: {:?}", other),
        }
        // Break the cycle so the node is freed.
        unsafe { node.constructor_set_field(0, Value::scalar_from_u8(0)); }
    }

    #[test]
    #[should_panic(expected = "Field index out of bounds")]
    fn set_field_out_of_bounds()
    {
        let node = Value::constructor(0, vec![], &[]).unwrap();
        unsafe { node.constructor_set_field(0, Value::scalar_from_u8(0)); }
    }
}
