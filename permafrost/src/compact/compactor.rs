use {
    crate::{
        integer::Int,
        value::{
            REGION_OWNED,
            Val,
            Value,
            array_payload_size,
            byte_array_payload_size,
            constructor_payload_size,
            extra_word,
            on_heap_tag,
            string_payload_size,
        },
    },
    super::{
        CompactError,
        CompactorConfig,
        layout::{
            MAGIC,
            REGION_HEADER_SIZE,
            TERMINATOR,
            TERMINATOR_SIZE,
            offsets,
            payload_sizes,
            record_size,
        },
    },
    smallvec::SmallVec,
    std::{
        cell::Cell,
        collections::{HashMap, hash_map::DefaultHasher},
        hash::Hasher,
        marker::PhantomData,
    },
};

/// Counts of what a compactor has written.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CompactStats
{
    /// Roots compacted, each followed by a terminator.
    pub roots: usize,

    /// Records written, excluding terminators.
    pub objects: usize,

    /// Leaf objects that were found to be structurally equal
    /// to an object already in the region, and thus not written.
    pub shared: usize,
}

/// Copies values into a region.
///
/// Every call to [`compact`][`Self::compact`] adds one root to the region.
/// Objects reachable from several roots are stored only once,
/// and so are cycles. The resulting bytes can be turned into a
/// [`CompactedRegion`][`super::CompactedRegion`], or persisted.
///
/// The compactor keeps every object it copied alive, so that
/// its address is not reused by an unrelated object while the
/// compactor could still confuse the two.
pub struct Compactor
{
    bytes: Vec<u8>,
    base_addr: u64,
    max_sharing: bool,

    /// Objects already copied, keyed by their address,
    /// with the reference to their record.
    copied: HashMap<u64, (Value, u64)>,

    /// Leaf records, keyed by the hash of their contents.
    shared: HashMap<u64, SmallVec<[SharedLeaf; 1]>>,

    /// Slots of copied containers that still need to be filled in.
    todo: Vec<PendingSlot>,

    /// Keys added to the tables during the current call to compact.
    copied_journal: Vec<u64>,
    shared_journal: Vec<u64>,

    stats: CompactStats,

    /// The tables are not synchronized.
    _phantom_data: PhantomData<Cell<()>>,
}

#[derive(Clone, Copy)]
struct SharedLeaf
{
    offset: usize,
    size: usize,
}

struct PendingSlot
{
    /// Offset of the slot in the region.
    slot: usize,

    /// The value whose reference goes into the slot.
    child: Value,
}

impl Compactor
{
    /// Create a compactor with an empty region.
    ///
    /// # Panics
    ///
    /// Panics if the base address is not a multiple of 8.
    pub fn new(config: CompactorConfig) -> Self
    {
        let base_addr = config.base_addr.map_or(0, |b| b.get());
        assert!(base_addr % 8 == 0, "Base address must be 8-aligned");

        let mut bytes = Vec::with_capacity(
            config.initial_capacity.max(REGION_HEADER_SIZE)
        );
        bytes.extend_from_slice(&MAGIC.to_ne_bytes());
        bytes.extend_from_slice(&base_addr.to_ne_bytes());

        Self{
            bytes,
            base_addr,
            max_sharing: config.max_sharing,
            copied: HashMap::new(),
            shared: HashMap::new(),
            todo: Vec::new(),
            copied_journal: Vec::new(),
            shared_journal: Vec::new(),
            stats: CompactStats::default(),
            _phantom_data: PhantomData,
        }
    }

    /// The bytes of the region.
    pub fn data(&self) -> &[u8]
    {
        &self.bytes
    }

    /// The number of bytes in the region.
    pub fn size(&self) -> usize
    {
        self.bytes.len()
    }

    /// The number of bytes reserved for the region.
    pub fn capacity(&self) -> usize
    {
        self.bytes.capacity()
    }

    /// The base address of the region, or zero for none.
    pub fn base_addr(&self) -> u64
    {
        self.base_addr
    }

    /// Counts of what was written so far.
    pub fn stats(&self) -> CompactStats
    {
        self.stats
    }

    /// Copy everything reachable from `root` into the region,
    /// followed by a terminator.
    ///
    /// On error the region and the tables are left as they were.
    pub fn compact(&mut self, root: &Value) -> Result<(), CompactError>
    {
        log::trace!("Compacting root {:?} at offset {}", root, self.size());

        let size = self.size();
        let stats = self.stats;

        match self.compact_root(root) {
            Ok(()) => {
                self.copied_journal.clear();
                self.shared_journal.clear();
                log::debug!(
                    "Compacted root {}: {} bytes, {} objects, {} shared",
                    self.stats.roots,
                    self.size() - size,
                    self.stats.objects - stats.objects,
                    self.stats.shared - stats.shared,
                );
                Ok(())
            },
            Err(err) => {
                self.rollback(size, stats);
                log::debug!("Compaction failed, rolled back: {}", err);
                Err(err)
            },
        }
    }

    fn compact_root(&mut self, root: &Value) -> Result<(), CompactError>
    {
        let stored_root = self.to_stored(root)?;

        while let Some(PendingSlot{slot, child}) = self.todo.pop() {
            let stored = self.to_stored(&child)?;
            self.write_word(slot, stored);
        }

        let offset = self.reserve_record(TERMINATOR_SIZE)?;
        self.write_header(offset, TERMINATOR, 0);
        self.write_word(offset + offsets::TERMINATOR_ROOT, stored_root);
        self.stats.roots += 1;

        Ok(())
    }

    fn rollback(&mut self, size: usize, stats: CompactStats)
    {
        self.bytes.truncate(size);
        self.todo.clear();
        self.stats = stats;

        for key in self.copied_journal.drain(..) {
            self.copied.remove(&key);
        }

        // Entries were pushed onto their buckets in this order.
        for hash in self.shared_journal.drain(..).rev() {
            if let Some(bucket) = self.shared.get_mut(&hash) {
                bucket.pop();
                if bucket.is_empty() {
                    self.shared.remove(&hash);
                }
            }
        }
    }

    /// The word to store for a reference to the given value.
    ///
    /// Values that are not yet in the region are copied into it.
    /// The slots of copied containers are queued onto the worklist.
    fn to_stored(&mut self, value: &Value) -> Result<u64, CompactError>
    {
        let raw = value.as_raw();

        // Scalars are stored as is.
        if raw & 0b1 == 0b1 {
            return Ok(raw);
        }

        if let Some(&(_, stored)) = self.copied.get(&raw) {
            return Ok(stored);
        }

        let stored = match value.borrow() {
            Val::Scalar(_) =>
                unreachable!("Scalar words have the least significant bit set"),

            Val::Constructor{tag, fields, scalars} =>
                self.copy_constructor(tag, fields, scalars)?,

            Val::Array(elements) =>
                self.copy_array(elements)?,

            Val::ByteArray{elem_size, bytes} =>
                self.copy_byte_array(elem_size, bytes)?,

            Val::String(bytes) =>
                self.copy_string(bytes)?,

            Val::Thunk(Some(value)) =>
                self.copy_thunk(value)?,
            Val::Thunk(None) =>
                return Err(CompactError::UnforcedThunk),

            Val::Task(Some(value)) =>
                self.copy_cell(on_heap_tag::TASK, value)?,
            Val::Task(None) =>
                return Err(CompactError::PendingTask),

            Val::Promise(Some(value)) =>
                self.copy_cell(on_heap_tag::PROMISE, value)?,
            Val::Promise(None) =>
                return Err(CompactError::PendingPromise),

            Val::MutableRef(value) =>
                self.copy_mutable_ref(value)?,

            Val::BigInteger(int) =>
                self.copy_big_integer(int)?,
        };

        self.copied.insert(raw, (value.clone(), stored));
        self.copied_journal.push(raw);

        Ok(stored)
    }

    /* -------------------------------------------------------------------- */
    /*                              Containers                              */
    /* -------------------------------------------------------------------- */

    fn copy_constructor(&mut self, tag: u16, fields: &[Value], scalars: &[u8])
        -> Result<u64, CompactError>
    {
        let payload_size = constructor_payload_size(fields.len(), scalars.len())
            .ok_or(CompactError::RegionTooLarge)?;
        let offset = self.reserve_payload(payload_size)?;

        self.write_header(offset, on_heap_tag::CONSTRUCTOR, u32::from(tag));
        self.write_word(offset + offsets::CONSTRUCTOR_NUM_FIELDS, fields.len() as u64);
        self.write_word(offset + offsets::CONSTRUCTOR_SCALAR_SIZE, scalars.len() as u64);

        let fields_at = offset + offsets::CONSTRUCTOR_FIELDS;
        let scalars_at = fields_at + 8 * fields.len();
        self.bytes[scalars_at .. scalars_at + scalars.len()]
            .copy_from_slice(scalars);
        self.push_slots(fields_at, fields);

        Ok(self.stored_ref(offset))
    }

    fn copy_array(&mut self, elements: &[Value]) -> Result<u64, CompactError>
    {
        let payload_size = array_payload_size(elements.len())
            .ok_or(CompactError::RegionTooLarge)?;
        let offset = self.reserve_payload(payload_size)?;

        self.write_header(offset, on_heap_tag::ARRAY, 0);
        self.write_word(offset + offsets::ARRAY_LEN, elements.len() as u64);
        self.push_slots(offset + offsets::ARRAY_ELEMENTS, elements);

        Ok(self.stored_ref(offset))
    }

    fn copy_thunk(&mut self, value: Value) -> Result<u64, CompactError>
    {
        // Only the forced value is kept; the closure slot stays zero.
        let offset = self.reserve_payload(payload_sizes::THUNK)?;
        self.write_header(offset, on_heap_tag::THUNK, 0);
        self.push_slot(offset + offsets::THUNK_VALUE, value);
        Ok(self.stored_ref(offset))
    }

    fn copy_cell(&mut self, tag: u32, value: Value) -> Result<u64, CompactError>
    {
        let offset = self.reserve_payload(payload_sizes::CELL)?;
        self.write_header(offset, tag, 0);
        self.push_slot(offset + offsets::CELL_VALUE, value);
        Ok(self.stored_ref(offset))
    }

    fn copy_mutable_ref(&mut self, value: Value) -> Result<u64, CompactError>
    {
        // The lock stays zero; compacted references are never locked.
        let offset = self.reserve_payload(payload_sizes::MUTABLE_REF)?;
        self.write_header(offset, on_heap_tag::MUTABLE_REF, 0);
        self.push_slot(offset + offsets::MUTABLE_REF_VALUE, value);
        Ok(self.stored_ref(offset))
    }

    fn push_slots(&mut self, at: usize, children: &[Value])
    {
        // Reversed, so that children are copied in order.
        for (i, child) in children.iter().enumerate().rev() {
            self.push_slot(at + 8 * i, child.clone());
        }
    }

    fn push_slot(&mut self, slot: usize, child: Value)
    {
        let raw = child.as_raw();
        if raw & 0b1 == 0b1 {
            self.write_word(slot, raw);
        } else {
            self.todo.push(PendingSlot{slot, child});
        }
    }

    /* -------------------------------------------------------------------- */
    /*                                Leaves                                */
    /* -------------------------------------------------------------------- */

    fn copy_byte_array(&mut self, elem_size: u8, bytes: &[u8])
        -> Result<u64, CompactError>
    {
        let payload_size = byte_array_payload_size(bytes.len())
            .ok_or(CompactError::RegionTooLarge)?;
        let offset = self.reserve_payload(payload_size)?;

        let len = bytes.len() / usize::from(elem_size);
        self.write_header(offset, on_heap_tag::BYTE_ARRAY, u32::from(elem_size));
        self.write_word(offset + offsets::BYTE_ARRAY_LEN, len as u64);
        let at = offset + offsets::BYTE_ARRAY_BYTES;
        self.bytes[at .. at + bytes.len()].copy_from_slice(bytes);

        Ok(self.share_leaf(offset, offsets::BYTE_ARRAY_LEN))
    }

    fn copy_string(&mut self, bytes: &[u8]) -> Result<u64, CompactError>
    {
        let payload_size = string_payload_size(bytes.len())
            .ok_or(CompactError::RegionTooLarge)?;
        let offset = self.reserve_payload(payload_size)?;

        // The terminating nul is already there, as records start zeroed.
        self.write_header(offset, on_heap_tag::STRING, 0);
        self.write_word(offset + offsets::STRING_LEN, bytes.len() as u64);
        let at = offset + offsets::STRING_BYTES;
        self.bytes[at .. at + bytes.len()].copy_from_slice(bytes);

        Ok(self.share_leaf(offset, offsets::STRING_LEN))
    }

    fn copy_big_integer(&mut self, int: Int) -> Result<u64, CompactError>
    {
        let payload_size = payload_sizes::big_integer(int.limbs.len())
            .ok_or(CompactError::RegionTooLarge)?;
        let offset = self.reserve_payload(payload_size)?;

        let inline = offset + offsets::BIG_INTEGER_INLINE;
        self.write_header(offset, on_heap_tag::BIG_INTEGER, u32::from(int.negative));
        self.write_word(offset + offsets::BIG_INTEGER_LIMBS, self.stored_ref(inline));
        self.write_word(offset + offsets::BIG_INTEGER_LEN, int.limbs.len() as u64);
        for (i, &limb) in int.limbs.iter().enumerate() {
            self.write_word(inline + 8 * i, limb);
        }

        // The limb reference differs between copies; it is not content.
        Ok(self.share_leaf(offset, offsets::BIG_INTEGER_LEN))
    }

    /// Find a leaf record with the same contents as the one just written.
    ///
    /// The contents are the extra data in the header
    /// and the bytes of the record from `content_at` onwards.
    /// If there is such a record, the one just written is removed.
    /// Returns the reference to the record to use.
    fn share_leaf(&mut self, offset: usize, content_at: usize) -> u64
    {
        if !self.max_sharing {
            return self.stored_ref(offset);
        }

        let size = self.bytes.len() - offset;
        let (extra, content) = leaf_contents(&self.bytes, offset, content_at, size);
        let mut hasher = DefaultHasher::new();
        hasher.write(extra);
        hasher.write(content);
        let hash = hasher.finish();

        let bucket = self.shared.entry(hash).or_default();
        let found = bucket.iter().find(|leaf| {
            leaf.size == size
                && leaf_contents(&self.bytes, leaf.offset, content_at, size)
                   == (extra, content)
        });

        if let Some(leaf) = found {
            let stored = self.base_addr + leaf.offset as u64;
            self.bytes.truncate(offset);
            self.stats.objects -= 1;
            self.stats.shared += 1;
            return stored;
        }

        bucket.push(SharedLeaf{offset, size});
        self.shared_journal.push(hash);
        self.stored_ref(offset)
    }

    /* -------------------------------------------------------------------- */
    /*                            Writing bytes                             */
    /* -------------------------------------------------------------------- */

    /// Append a zeroed record for an object with the given payload size.
    fn reserve_payload(&mut self, payload_size: usize)
        -> Result<usize, CompactError>
    {
        let size = record_size(payload_size)
            .ok_or(CompactError::RegionTooLarge)?;
        let offset = self.reserve_record(size)?;
        self.stats.objects += 1;
        Ok(offset)
    }

    /// Append a zeroed record of the given size.
    fn reserve_record(&mut self, size: usize) -> Result<usize, CompactError>
    {
        let offset = self.bytes.len();
        let end = offset.checked_add(size)
            .filter(|&end| end <= isize::MAX as usize)
            .filter(|&end| self.base_addr.checked_add(end as u64).is_some())
            .ok_or(CompactError::RegionTooLarge)?;
        self.bytes.resize(end, 0);
        Ok(offset)
    }

    fn stored_ref(&self, offset: usize) -> u64
    {
        // Cannot overflow, as checked by reserve_record.
        self.base_addr + offset as u64
    }

    fn write_header(&mut self, offset: usize, tag: u32, extra: u32)
    {
        self.write_u32(offset, REGION_OWNED);
        self.write_u32(offset + 4, extra_word(tag, extra));
    }

    fn write_u32(&mut self, offset: usize, value: u32)
    {
        self.bytes[offset .. offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    fn write_word(&mut self, offset: usize, word: u64)
    {
        self.bytes[offset .. offset + 8].copy_from_slice(&word.to_ne_bytes());
    }

    #[cfg(test)]
    fn read_word(&self, offset: usize) -> u64
    {
        super::layout::read_word(&self.bytes, offset)
    }
}

/// The extra data and contents of the leaf record at `offset`.
fn leaf_contents(bytes: &[u8], offset: usize, content_at: usize, size: usize)
    -> (&[u8], &[u8])
{
    let extra = &bytes[offset + 4 .. offset + 8];
    let content = &bytes[offset + content_at .. offset + size];
    (extra, content)
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        proptest::{collection::vec as pvec, num::u8::ANY as pu8, proptest},
        std::num::NonZeroU64,
    };

    fn compactor() -> Compactor
    {
        Compactor::new(CompactorConfig::default())
    }

    #[test]
    fn empty_region_has_header()
    {
        let compactor = compactor();
        assert_eq!(compactor.size(), REGION_HEADER_SIZE);
        assert_eq!(compactor.read_word(0), MAGIC);
        assert_eq!(compactor.read_word(8), 0);
    }

    #[test]
    #[should_panic(expected = "8-aligned")]
    fn misaligned_base_addr()
    {
        let config = CompactorConfig{
            base_addr: NonZeroU64::new(0x7000_0000_0001),
            ..CompactorConfig::default()
        };
        let _ = Compactor::new(config);
    }

    #[test]
    fn scalar_root()
    {
        let mut compactor = compactor();
        let root = Value::scalar(12345).unwrap();
        compactor.compact(&root).unwrap();

        // Only a terminator, holding the scalar itself.
        assert_eq!(compactor.size(), REGION_HEADER_SIZE + TERMINATOR_SIZE);
        let root_at = REGION_HEADER_SIZE + offsets::TERMINATOR_ROOT;
        assert_eq!(compactor.read_word(root_at), root.as_raw());
        assert_eq!(compactor.stats().objects, 0);
    }

    #[test]
    fn references_include_base_addr()
    {
        let base_addr = NonZeroU64::new(0x7000_0000_0000).unwrap();
        let config = CompactorConfig::default().with_base_addr(base_addr);
        let mut compactor = Compactor::new(config);
        compactor.compact(&Value::string_from_bytes(b"x").unwrap()).unwrap();

        assert_eq!(compactor.read_word(8), base_addr.get());
        let root_at = compactor.size() - TERMINATOR_SIZE + offsets::TERMINATOR_ROOT;
        let expected = base_addr.get() + REGION_HEADER_SIZE as u64;
        assert_eq!(compactor.read_word(root_at), expected);
    }

    #[test]
    fn shared_object_is_copied_once()
    {
        let leaf = Value::array(vec![]).unwrap();
        let root = Value::array(vec![leaf.clone(), leaf]).unwrap();
        let mut compactor = compactor();
        compactor.compact(&root).unwrap();
        assert_eq!(compactor.stats().objects, 2);
        assert_eq!(compactor.stats().shared, 0);
    }

    #[test]
    fn equal_strings_are_shared()
    {
        let a = Value::string_from_bytes(b"hello").unwrap();
        let b = Value::string_from_bytes(b"hello").unwrap();
        let c = Value::string_from_bytes(b"world").unwrap();
        let root = Value::array(vec![a, b, c]).unwrap();

        let mut compactor = compactor();
        compactor.compact(&root).unwrap();
        assert_eq!(compactor.stats(), CompactStats{roots: 1, objects: 3, shared: 1});

        let elements = REGION_HEADER_SIZE + offsets::ARRAY_ELEMENTS;
        assert_eq!(compactor.read_word(elements), compactor.read_word(elements + 8));
        assert_ne!(compactor.read_word(elements), compactor.read_word(elements + 16));
    }

    #[test]
    fn sharing_can_be_disabled()
    {
        let a = Value::string_from_bytes(b"hello").unwrap();
        let b = Value::string_from_bytes(b"hello").unwrap();
        let root = Value::array(vec![a, b]).unwrap();

        let config = CompactorConfig::default().with_max_sharing(false);
        let mut compactor = Compactor::new(config);
        compactor.compact(&root).unwrap();
        assert_eq!(compactor.stats(), CompactStats{roots: 1, objects: 3, shared: 0});
    }

    #[test]
    fn strings_and_byte_arrays_are_not_confused()
    {
        let string = Value::string_from_bytes(b"abc").unwrap();
        let bytes = Value::byte_array(1, b"abc\0").unwrap();
        let root = Value::array(vec![string, bytes]).unwrap();
        let mut compactor = compactor();
        compactor.compact(&root).unwrap();
        assert_eq!(compactor.stats().shared, 0);
    }

    #[test]
    fn equal_big_integers_are_shared()
    {
        let a = Value::big_integer(false, &[1, 2, 3]).unwrap();
        let b = Value::big_integer(false, &[1, 2, 3]).unwrap();
        let c = Value::big_integer(true, &[1, 2, 3]).unwrap();
        let root = Value::array(vec![a, b, c]).unwrap();
        let mut compactor = compactor();
        compactor.compact(&root).unwrap();
        assert_eq!(compactor.stats().shared, 1);
    }

    #[test]
    fn constructors_are_not_shared()
    {
        let a = Value::constructor(1, vec![], b"same").unwrap();
        let b = Value::constructor(1, vec![], b"same").unwrap();
        let root = Value::array(vec![a, b]).unwrap();
        let mut compactor = compactor();
        compactor.compact(&root).unwrap();
        assert_eq!(compactor.stats(), CompactStats{roots: 1, objects: 3, shared: 0});
    }

    #[test]
    fn errors_roll_back()
    {
        let mut compactor = compactor();
        let shared = Value::string_from_bytes(b"shared").unwrap();
        compactor.compact(&shared).unwrap();
        let size = compactor.size();
        let stats = compactor.stats();

        let pending = [
            (Value::thunk(Value::scalar_from_u8(0)), CompactError::UnforcedThunk),
            (Value::task(), CompactError::PendingTask),
            (Value::promise(), CompactError::PendingPromise),
        ];
        for (cell, expected) in pending {
            let fresh = Value::string_from_bytes(b"fresh").unwrap();
            let root = Value::array(vec![shared.clone(), fresh, cell]).unwrap();
            assert_eq!(compactor.compact(&root), Err(expected));
            assert_eq!(compactor.size(), size);
            assert_eq!(compactor.stats(), stats);
            assert_eq!(compactor.copied.len(), 1);
            assert_eq!(compactor.shared.len(), 1);
        }

        // The compactor is still usable after an error.
        let root = Value::array(vec![shared]).unwrap();
        compactor.compact(&root).unwrap();
        assert_eq!(compactor.stats().roots, 2);
        assert_eq!(compactor.stats().objects, 2);
    }

    #[test]
    fn cycles_terminate()
    {
        let node = Value::constructor(0, vec![Value::scalar_from_u8(0)], &[])
            .unwrap();
        unsafe { node.constructor_set_field(0, node.clone()); }

        let mut compactor = compactor();
        compactor.compact(&node).unwrap();
        assert_eq!(compactor.stats().objects, 1);

        let field = REGION_HEADER_SIZE + offsets::CONSTRUCTOR_FIELDS;
        assert_eq!(compactor.read_word(field), REGION_HEADER_SIZE as u64);

        unsafe { node.constructor_set_field(0, Value::scalar_from_u8(0)); }
    }

    proptest!
    {
        #[test]
        fn records_stay_aligned(strings in pvec(pvec(pu8, 0 .. 30), 0 .. 20))
        {
            let elements = strings.iter()
                .map(|s| Value::string_from_bytes(s).unwrap())
                .collect();
            let root = Value::array(elements).unwrap();
            let mut compactor = compactor();
            compactor.compact(&root).unwrap();
            assert_eq!(compactor.size() % 8, 0);
        }
    }
}
