use {
    crate::value::{
        REGION_OWNED,
        Value,
        array_payload_size,
        byte_array_payload_size,
        constructor_payload_size,
        on_heap_tag,
        string_payload_size,
    },
    super::{
        Compactor,
        CorruptRegion,
        LoadError,
        layout::{
            BASE_ADDR_OFFSET,
            HEADER_SIZE,
            MAGIC,
            MAGIC_OFFSET,
            RECORD_ALIGN,
            REGION_HEADER_SIZE,
            TERMINATOR,
            TERMINATOR_SIZE,
            offsets,
            payload_sizes,
            read_u32,
            read_word,
            record_size,
        },
    },
    scope_exit::{BoxedScopeExit, ScopeExit},
    std::{
        alloc::{Layout, alloc, dealloc},
        io,
        num::NonZeroU64,
        ptr::{self, NonNull},
        slice,
    },
};

/// Values loaded from a compacted region.
///
/// The region owns the memory that backs its values.
/// When the region is released, either explicitly or by dropping it,
/// the release action passed on construction is performed,
/// exactly once. Values read from the region must not be used after that.
pub struct CompactedRegion
{
    begin: NonNull<u8>,
    size: usize,
    base_addr: u64,
    is_mmap: bool,

    roots: Vec<Value>,
    next: usize,

    /// Performs the release action when the region is released.
    free_data: Option<BoxedScopeExit>,
}

// SAFETY: After fixup, the region is never written to.
//         Values in the region are not reference counted.
unsafe impl Send for CompactedRegion { }
unsafe impl Sync for CompactedRegion { }

impl CompactedRegion
{
    /// Load a region from memory that holds its bytes.
    ///
    /// The references in the region are rewritten in place,
    /// for the region to be used at `data`. `base_addr` must be the
    /// base address the region was compacted for; it is checked
    /// against the one recorded in the region.
    ///
    /// `free_data` is performed when the region is released.
    /// If loading fails, it is performed before this function returns.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads and writes of `size` bytes
    /// until `free_data` is performed, and must not be accessed
    /// through any other means in the meantime.
    pub unsafe fn new(
        data: NonNull<u8>,
        size: usize,
        base_addr: Option<NonZeroU64>,
        is_mmap: bool,
        free_data: impl FnOnce() + Send + 'static,
    ) -> Result<Self, LoadError>
    {
        // If anything below fails, release the data.
        let free_data = ScopeExit::new(free_data);

        let base_addr = base_addr.map_or(0, NonZeroU64::get);
        let roots = fixup(data, size, base_addr).map_err(|err| {
            log::warn!("Rejected region of {} bytes at {:p}: {}", size, data, err);
            err
        })?;

        log::debug!(
            "Loaded region of {} bytes with {} roots at {:p} (base address {:#x})",
            size, roots.len(), data, base_addr,
        );

        Ok(Self{
            begin: data,
            size,
            base_addr,
            is_mmap,
            roots,
            next: 0,
            free_data: Some(free_data.boxed()),
        })
    }

    /// Load a region from a copy of the bytes of a compactor.
    pub fn from_compactor(compactor: &Compactor) -> Result<Self, LoadError>
    {
        let base_addr = NonZeroU64::new(compactor.base_addr());
        Self::from_bytes(compactor.data(), base_addr)
    }

    /// Load a region from a copy of the given bytes.
    pub fn from_bytes(bytes: &[u8], base_addr: Option<NonZeroU64>)
        -> Result<Self, LoadError>
    {
        let out_of_memory = || io::Error::from(io::ErrorKind::OutOfMemory);

        // Never allocate zero bytes; such regions are rejected anyway.
        let layout = Layout::from_size_align(bytes.len().max(1), RECORD_ALIGN)
            .map_err(|_| out_of_memory())?;

        // SAFETY: The layout has a non-zero size.
        let data = unsafe { alloc(layout) };
        let data = NonNull::new(data).ok_or_else(out_of_memory)?;

        // SAFETY: The allocation is large enough.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), data.as_ptr(), bytes.len());
        }

        // NonNull is not Send, so the action keeps the address instead.
        let addr = data.as_ptr() as usize;
        let free_data = move || {
            // SAFETY: The data was allocated above with this layout.
            unsafe { dealloc(addr as *mut u8, layout); }
        };

        // SAFETY: The region exclusively owns the allocation.
        unsafe { Self::new(data, bytes.len(), base_addr, false, free_data) }
    }

    /// Read the next root, in the order in which they were compacted.
    ///
    /// Returns [`None`] once all roots have been read.
    ///
    /// # Safety
    ///
    /// The returned value, and any value obtained from it,
    /// must not be used after the region is released.
    pub unsafe fn read(&mut self) -> Option<Value>
    {
        let root = self.roots.get(self.next)?.clone();
        self.next += 1;
        Some(root)
    }

    /// Release the region, performing its release action.
    ///
    /// Releasing a region that was already released does nothing.
    pub fn release(&mut self)
    {
        self.roots.clear();
        if let Some(free_data) = self.free_data.take() {
            log::trace!("Releasing region of {} bytes at {:p}", self.size, self.begin);
            free_data.run();
        }
    }

    /// The number of bytes in the region.
    pub fn size(&self) -> usize
    {
        self.size
    }

    /// The base address the region was compacted for, or zero for none.
    pub fn base_addr(&self) -> u64
    {
        self.base_addr
    }

    /// Whether the region is backed by a memory mapping.
    pub fn is_memory_mapped(&self) -> bool
    {
        self.is_mmap
    }

    /// The number of roots in the region.
    ///
    /// Zero once the region has been released.
    pub fn root_count(&self) -> usize
    {
        self.roots.len()
    }
}

impl Drop for CompactedRegion
{
    fn drop(&mut self)
    {
        self.release();
    }
}

/* ------------------------------------------------------------------------ */
/*                                  Fixup                                   */
/* ------------------------------------------------------------------------ */

/// Validate a region and rewrite its references for use at `begin`.
///
/// Returns the roots of the region.
unsafe fn fixup(begin: NonNull<u8>, size: usize, base_addr: u64)
    -> Result<Vec<Value>, CorruptRegion>
{
    if begin.as_ptr() as usize % RECORD_ALIGN != 0 || size % RECORD_ALIGN != 0 {
        return Err(CorruptRegion::Misaligned);
    }

    let bytes = slice::from_raw_parts_mut(begin.as_ptr(), size);

    if size < REGION_HEADER_SIZE || read_word(bytes, MAGIC_OFFSET) != MAGIC {
        return Err(CorruptRegion::BadMagic);
    }

    // Stored references to objects must never look like scalars.
    let stored = read_word(bytes, BASE_ADDR_OFFSET);
    if stored % RECORD_ALIGN as u64 != 0 {
        return Err(CorruptRegion::Misaligned);
    }
    if stored != base_addr {
        return Err(CorruptRegion::BaseAddrMismatch{stored, declared: base_addr});
    }

    let records = scan(bytes, begin.as_ptr() as u64, base_addr)?;

    // Rewrite the references, now that all records are known.
    let relocate = |slot: usize, bytes: &mut [u8]| -> Result<u64, CorruptRegion> {
        let stored = read_word(bytes, slot);
        if stored & 0b1 == 0b1 {
            return Ok(stored);
        }
        let dangling = CorruptRegion::DanglingReference{offset: slot, stored};
        let offset = stored.checked_sub(base_addr)
            .and_then(|offset| usize::try_from(offset).ok())
            .filter(|&offset| records.is_record_start(offset))
            .ok_or(dangling)?;
        let real = begin.as_ptr() as u64 + offset as u64;
        write_word(bytes, slot, real);
        Ok(real)
    };

    for &slot in &records.slots {
        relocate(slot, bytes)?;
    }

    let mut roots = Vec::with_capacity(records.terminators.len());
    for &terminator in &records.terminators {
        let root = relocate(terminator + offsets::TERMINATOR_ROOT, bytes)?;
        // SAFETY: The root is a scalar or a region-owned object,
        //         so the value does not own a reference count.
        roots.push(Value::from_raw(root));
    }

    Ok(roots)
}

/// The result of scanning the records of a region.
struct Scan
{
    /// One flag per word, set where an object record starts.
    record_starts: Vec<bool>,

    /// Offsets of words that hold references.
    slots: Vec<usize>,

    /// Offsets of terminator records.
    terminators: Vec<usize>,
}

impl Scan
{
    fn is_record_start(&self, offset: usize) -> bool
    {
        offset % RECORD_ALIGN == 0
            && self.record_starts.get(offset / RECORD_ALIGN) == Some(&true)
    }
}

/// Walk the records of a region, validating their tags and sizes.
///
/// Record headers are marked as region-owned along the way,
/// and big integers are pointed at their inline limbs.
fn scan(bytes: &mut [u8], begin: u64, base_addr: u64)
    -> Result<Scan, CorruptRegion>
{
    let size = bytes.len();
    let mut scan = Scan{
        record_starts: vec![false; size / RECORD_ALIGN],
        slots: Vec::new(),
        terminators: Vec::new(),
    };

    let mut offset = REGION_HEADER_SIZE;
    let mut after_terminator = false;

    while offset < size {
        let record = Record{bytes: &*bytes, offset};
        let extra_word = record.u32_at(4)?;
        let tag = extra_word & 0b1111;
        let extra = extra_word >> 4;

        let num_slots = |len: u64| {
            usize::try_from(len).map_err(|_| record.truncated())
        };

        // The record size and the offsets of its reference slots.
        let (payload_size, first_slot, slot_count) = match tag {
            on_heap_tag::CONSTRUCTOR => {
                let num_fields = num_slots(record.word_at(offsets::CONSTRUCTOR_NUM_FIELDS)?)?;
                let scalar_size = num_slots(record.word_at(offsets::CONSTRUCTOR_SCALAR_SIZE)?)?;
                let payload_size = constructor_payload_size(num_fields, scalar_size);
                (payload_size, offsets::CONSTRUCTOR_FIELDS, num_fields)
            },
            on_heap_tag::ARRAY => {
                let len = num_slots(record.word_at(offsets::ARRAY_LEN)?)?;
                (array_payload_size(len), offsets::ARRAY_ELEMENTS, len)
            },
            on_heap_tag::BYTE_ARRAY => {
                let len = num_slots(record.word_at(offsets::BYTE_ARRAY_LEN)?)?;
                let payload_size = len.checked_mul(extra as usize)
                    .and_then(byte_array_payload_size);
                (payload_size, 0, 0)
            },
            on_heap_tag::STRING => {
                let len = num_slots(record.word_at(offsets::STRING_LEN)?)?;
                (string_payload_size(len), 0, 0)
            },
            on_heap_tag::THUNK => {
                let closure = record.word_at(offsets::THUNK_CLOSURE)?;
                if closure != 0 {
                    return Err(CorruptRegion::DanglingReference{
                        offset: offset + offsets::THUNK_CLOSURE,
                        stored: closure,
                    });
                }
                (Some(payload_sizes::THUNK), offsets::THUNK_VALUE, 1)
            },
            on_heap_tag::TASK | on_heap_tag::PROMISE =>
                (Some(payload_sizes::CELL), offsets::CELL_VALUE, 1),
            on_heap_tag::MUTABLE_REF =>
                (Some(payload_sizes::MUTABLE_REF), offsets::MUTABLE_REF_VALUE, 1),
            on_heap_tag::BIG_INTEGER => {
                let len = num_slots(record.word_at(offsets::BIG_INTEGER_LEN)?)?;
                let limbs = record.word_at(offsets::BIG_INTEGER_LIMBS)?;
                let inline = offset + offsets::BIG_INTEGER_INLINE;
                if limbs != base_addr.wrapping_add(inline as u64) {
                    return Err(CorruptRegion::DanglingReference{
                        offset: offset + offsets::BIG_INTEGER_LIMBS,
                        stored: limbs,
                    });
                }
                // Zero is never negative.
                if len == 0 && extra != 0 {
                    return Err(CorruptRegion::BadExtraData{offset, tag, extra});
                }
                (payload_sizes::big_integer(len), 0, 0)
            },
            TERMINATOR =>
                (Some(TERMINATOR_SIZE - HEADER_SIZE), 0, 0),
            _ =>
                return Err(CorruptRegion::UnknownTag{offset, tag}),
        };

        if !is_valid_extra(tag, extra) {
            return Err(CorruptRegion::BadExtraData{offset, tag, extra});
        }

        let record_len = payload_size.and_then(record_size)
            .filter(|&len| len <= size - offset)
            .ok_or(record.truncated())?;

        // The record is known to fit; now it may be modified.
        write_u32(bytes, offset, REGION_OWNED);

        if tag == TERMINATOR {
            scan.terminators.push(offset);
        } else {
            scan.record_starts[offset / RECORD_ALIGN] = true;
            let first_slot = offset + first_slot;
            scan.slots.extend((0 .. slot_count).map(|i| first_slot + 8 * i));
        }

        if tag == on_heap_tag::MUTABLE_REF {
            write_u32(bytes, offset + offsets::MUTABLE_REF_LOCK, 0);
        }

        if tag == on_heap_tag::BIG_INTEGER {
            let inline = offset + offsets::BIG_INTEGER_INLINE;
            write_word(bytes, offset + offsets::BIG_INTEGER_LIMBS, begin + inline as u64);
        }

        offset += record_len;
        after_terminator = tag == TERMINATOR;
    }

    if !after_terminator {
        return Err(CorruptRegion::MissingTerminator);
    }

    Ok(scan)
}

/// Whether a record header carries extra data that its kind can hold.
fn is_valid_extra(tag: u32, extra: u32) -> bool
{
    match tag {
        on_heap_tag::CONSTRUCTOR => extra <= u32::from(u16::MAX),
        on_heap_tag::BYTE_ARRAY  => (1 ..= u32::from(u8::MAX)).contains(&extra),
        on_heap_tag::BIG_INTEGER => extra <= 1,
        _                        => extra == 0,
    }
}

/// A record that has not yet been validated.
#[derive(Clone, Copy)]
struct Record<'a>
{
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Record<'a>
{
    fn truncated(&self) -> CorruptRegion
    {
        CorruptRegion::Truncated{offset: self.offset}
    }

    fn word_at(&self, at: usize) -> Result<u64, CorruptRegion>
    {
        let at = self.offset + at;
        if at + 8 > self.bytes.len() {
            return Err(self.truncated());
        }
        Ok(read_word(self.bytes, at))
    }

    fn u32_at(&self, at: usize) -> Result<u32, CorruptRegion>
    {
        let at = self.offset + at;
        if at + 4 > self.bytes.len() {
            return Err(self.truncated());
        }
        Ok(read_u32(self.bytes, at))
    }
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32)
{
    bytes[offset .. offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn write_word(bytes: &mut [u8], offset: usize, word: u64)
{
    bytes[offset .. offset + 8].copy_from_slice(&word.to_ne_bytes());
}
