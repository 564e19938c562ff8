//! The format of compacted regions.
//!
//! A region consists of a region header followed by records.
//! The region header holds [`MAGIC`] and the base address.
//! Each record is an [`OnHeapHeader`] followed by the payload of its kind,
//! exactly as laid out for live values, padded to a multiple of 8 bytes.
//! After the records for each root comes a terminator record,
//! whose header has the [`TERMINATOR`] tag and whose payload
//! is the reference to the root. The region ends after a terminator.
//!
//! References are stored as the base address plus the offset of the
//! record in the region. Scalars are stored as is; they are told apart
//! from references by their least significant bit, as in live values.
//! All words are in native byte order.

use {
    crate::value::{
        OnHeapArray,
        OnHeapBigInteger,
        OnHeapByteArray,
        OnHeapCell,
        OnHeapConstructor,
        OnHeapHeader,
        OnHeapMutableRef,
        OnHeapString,
        OnHeapThunk,
    },
    std::mem::{offset_of, size_of},
};

/// Identifies a region and the version of its format.
pub const MAGIC: u64 = u64::from_le_bytes(*b"PFROST\x00\x01");

/// Offset of [`MAGIC`] in the region header.
pub const MAGIC_OFFSET: usize = 0;

/// Offset of the base address in the region header.
///
/// The base address is zero if the region has none.
pub const BASE_ADDR_OFFSET: usize = 8;

/// Size of the region header; the offset of the first record.
pub const REGION_HEADER_SIZE: usize = 16;

/// Every record starts at a multiple of this.
pub const RECORD_ALIGN: usize = 8;

/// Size of a record header.
pub const HEADER_SIZE: usize = size_of::<OnHeapHeader>();

/// Tag of terminator records.
pub const TERMINATOR: u32 = 0b1111;

/// Size of a terminator record.
pub const TERMINATOR_SIZE: usize = HEADER_SIZE + size_of::<u64>();

/// Size of a record with the given payload size,
/// or [`None`] if it does not fit in the address space.
pub fn record_size(payload_size: usize) -> Option<usize>
{
    HEADER_SIZE.checked_add(payload_size)?
        .checked_next_multiple_of(RECORD_ALIGN)
}

/// Offsets of fields within records, from the start of the record.
pub mod offsets
{
    use super::*;

    pub const CONSTRUCTOR_NUM_FIELDS: usize =
        HEADER_SIZE + offset_of!(OnHeapConstructor, num_fields);
    pub const CONSTRUCTOR_SCALAR_SIZE: usize =
        HEADER_SIZE + offset_of!(OnHeapConstructor, scalar_size);
    pub const CONSTRUCTOR_FIELDS: usize =
        HEADER_SIZE + offset_of!(OnHeapConstructor, fields);

    pub const ARRAY_LEN: usize =
        HEADER_SIZE + offset_of!(OnHeapArray, len);
    pub const ARRAY_ELEMENTS: usize =
        HEADER_SIZE + offset_of!(OnHeapArray, elements);

    pub const BYTE_ARRAY_LEN: usize =
        HEADER_SIZE + offset_of!(OnHeapByteArray, len);
    pub const BYTE_ARRAY_BYTES: usize =
        HEADER_SIZE + offset_of!(OnHeapByteArray, bytes);

    pub const STRING_LEN: usize =
        HEADER_SIZE + offset_of!(OnHeapString, len);
    pub const STRING_BYTES: usize =
        HEADER_SIZE + offset_of!(OnHeapString, bytes);

    pub const THUNK_VALUE: usize =
        HEADER_SIZE + offset_of!(OnHeapThunk, value);
    pub const THUNK_CLOSURE: usize =
        HEADER_SIZE + offset_of!(OnHeapThunk, closure);

    pub const CELL_VALUE: usize =
        HEADER_SIZE + offset_of!(OnHeapCell, value);

    pub const MUTABLE_REF_LOCK: usize =
        HEADER_SIZE + offset_of!(OnHeapMutableRef, lock);
    pub const MUTABLE_REF_VALUE: usize =
        HEADER_SIZE + offset_of!(OnHeapMutableRef, value);

    pub const BIG_INTEGER_LIMBS: usize =
        HEADER_SIZE + offset_of!(OnHeapBigInteger, limbs);
    pub const BIG_INTEGER_LEN: usize =
        HEADER_SIZE + offset_of!(OnHeapBigInteger, len);

    /// Compacted big integers store their limbs inline, here.
    pub const BIG_INTEGER_INLINE: usize =
        HEADER_SIZE + size_of::<OnHeapBigInteger>();

    pub const TERMINATOR_ROOT: usize = HEADER_SIZE;
}

/// Payload sizes of the fixed-size kinds.
pub mod payload_sizes
{
    use super::*;

    pub const THUNK: usize = size_of::<OnHeapThunk>();
    pub const CELL: usize = size_of::<OnHeapCell>();
    pub const MUTABLE_REF: usize = size_of::<OnHeapMutableRef>();

    /// Compacted big integers store their limbs inline.
    pub fn big_integer(len: usize) -> Option<usize>
    {
        len.checked_mul(size_of::<u64>())?
            .checked_add(size_of::<OnHeapBigInteger>())
    }
}

/// Read the word at the given offset.
///
/// # Panics
///
/// Panics if the word is out of bounds.
pub fn read_word(bytes: &[u8], offset: usize) -> u64
{
    let mut word = [0; 8];
    word.copy_from_slice(&bytes[offset .. offset + 8]);
    u64::from_ne_bytes(word)
}

/// Read the u32 at the given offset.
///
/// # Panics
///
/// Panics if the u32 is out of bounds.
pub fn read_u32(bytes: &[u8], offset: usize) -> u32
{
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[offset .. offset + 4]);
    u32::from_ne_bytes(word)
}
