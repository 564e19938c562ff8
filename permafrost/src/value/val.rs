use {
    crate::integer::Int,
    super::{OnHeapHeader, Value, on_heap_tag},
    std::ptr::NonNull,
};

/// Borrowed value.
///
/// Cells whose contents may change or be settled later
/// (thunks, tasks, promises, and mutable references)
/// are borrowed as owned snapshots of their contents.
#[allow(missing_docs)]
#[derive(Debug)]
pub enum Val<'a>
{
    Scalar(u64),
    Constructor{tag: u16, fields: &'a [Value], scalars: &'a [u8]},
    Array(&'a [Value]),
    ByteArray{elem_size: u8, bytes: &'a [u8]},

    /// The bytes of the string, excluding the terminating nul.
    String(&'a [u8]),

    /// The cached value, or [`None`] if the thunk is unforced.
    Thunk(Option<Value>),

    /// The result, or [`None`] if the task is still pending.
    Task(Option<Value>),

    /// The result, or [`None`] if the promise is unresolved.
    Promise(Option<Value>),

    MutableRef(Value),
    BigInteger(Int<'a>),
}

/// Borrowing values.
impl Value
{
    /// Borrow the value.
    ///
    /// This gives convenient access the value in the form of an enum.
    /// You can pattern match on it to find out what kind of value this is.
    pub fn borrow(&self) -> Val
    {
        if let Some(on_heap) = self.get_on_heap() {
            // SAFETY: The value keeps the on-heap data alive.
            unsafe { Self::borrow_on_heap(on_heap) }
        } else {
            self.borrow_scalar()
        }
    }

    /// Call the correct `borrow_on_heap_*` method.
    ///
    /// # Safety
    ///
    /// The on-heap data must outlive the returned borrow.
    unsafe fn borrow_on_heap<'a>(on_heap: NonNull<OnHeapHeader>) -> Val<'a>
    {
        let tag = (*on_heap.as_ptr()).tag();
        match tag {
            on_heap_tag::CONSTRUCTOR => Self::borrow_on_heap_constructor(on_heap),
            on_heap_tag::ARRAY       => Self::borrow_on_heap_array(on_heap),
            on_heap_tag::BYTE_ARRAY  => Self::borrow_on_heap_byte_array(on_heap),
            on_heap_tag::STRING      => Self::borrow_on_heap_string(on_heap),
            on_heap_tag::THUNK       => Self::borrow_on_heap_thunk(on_heap),
            on_heap_tag::TASK        => Val::Task(Self::load_cell(on_heap)),
            on_heap_tag::PROMISE     => Val::Promise(Self::load_cell(on_heap)),
            on_heap_tag::MUTABLE_REF => Self::borrow_on_heap_mutable_ref(on_heap),
            on_heap_tag::BIG_INTEGER => Self::borrow_on_heap_big_integer(on_heap),
            _ => unreachable!("Value has an invalid on-heap tag"),
        }
    }
}
