//! Settle-once cells, shared by tasks and promises.

use {
    super::{
        OnHeapHeader,
        Orphans,
        Value,
        extra_word,
        payload_ptr,
    },
    std::{
        mem::{align_of, size_of},
        ptr::{NonNull, addr_of, addr_of_mut},
        sync::atomic::{AtomicU64, Ordering::{AcqRel, Acquire, Relaxed}},
    },
};

/// Representation of on-heap tasks and promises.
#[repr(C)]
pub (crate) struct OnHeapCell
{
    /// The raw word of the result, or zero while pending.
    pub value: AtomicU64,
}

impl Value
{
    /// Create a cell with the given tag, optionally already settled.
    pub (super) fn new_cell(tag: u32, value: Option<Value>) -> Self
    {
        let raw = value.map_or(0, Value::into_raw);

        let init_payload = |payload: *mut ()| unsafe {
            let payload = payload.cast::<OnHeapCell>();
            addr_of_mut!((*payload).value).write(AtomicU64::new(raw));
            extra_word(tag, 0)
        };

        // SAFETY: init_payload initializes the entire payload.
        let result = unsafe {
            Self::new_on_heap(
                size_of::<OnHeapCell>(),
                align_of::<OnHeapCell>(),
                init_payload,
            )
        };

        result.unwrap_or_else(|_| unreachable!("Cells have a fixed size"))
    }

    /// Load the result of a cell, if it is settled.
    ///
    /// # Safety
    ///
    /// The on-heap data must be a live or compacted cell.
    pub (super) unsafe fn load_cell(on_heap: NonNull<OnHeapHeader>)
        -> Option<Value>
    {
        let payload = payload_ptr::<OnHeapCell>(on_heap);
        match (*addr_of!((*payload).value)).load(Acquire) {
            0 => None,
            // SAFETY: Settled cells never change, so the cell keeps it alive.
            raw => Some(Self::clone_from_raw(raw)),
        }
    }

    /// Settle a cell, unless it is already settled.
    ///
    /// On failure, the given value is handed back.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a cell with the given tag.
    pub (super) fn settle_cell(&self, tag: u32, value: Value)
        -> Result<(), Value>
    {
        let on_heap = match self.get_on_heap() {
            // SAFETY: The value keeps the on-heap data alive.
            Some(on_heap) if unsafe { on_heap.as_ref() }.tag() == tag =>
                on_heap,
            _ => panic!("Value of kind {:?} cannot be settled", self.kind()),
        };

        // SAFETY: The tag says this is a cell.
        let payload = unsafe { &*payload_ptr::<OnHeapCell>(on_heap) };

        // Compacted cells are always settled,
        // so the exchange below fails for them without writing.
        let raw = value.as_raw();
        match payload.value.compare_exchange(0, raw, AcqRel, Acquire) {
            Ok(_) => { value.into_raw(); Ok(()) },
            Err(_) => Err(value),
        }
    }

    /// See [`Self::drop_on_heap`].
    pub (super) unsafe fn drop_on_heap_cell(
        on_heap: NonNull<OnHeapHeader>,
        orphans: &mut Orphans,
    )
    {
        let payload = payload_ptr::<OnHeapCell>(on_heap);
        orphans.release_raw((*addr_of!((*payload).value)).load(Relaxed));
    }
}
