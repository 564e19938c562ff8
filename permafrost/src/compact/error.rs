use {std::io, thiserror::Error};

/// Returned when a value cannot be compacted.
///
/// When this is returned, the compactor is left as it was
/// before the call; nothing of the failed root is kept.
#[derive(Debug, Eq, Error, PartialEq)]
pub enum CompactError
{
    /// A reachable thunk has not been forced.
    #[error("Cannot compact an unforced thunk")]
    UnforcedThunk,

    /// A reachable task has not completed.
    #[error("Cannot compact a pending task")]
    PendingTask,

    /// A reachable promise has not been resolved.
    #[error("Cannot compact an unresolved promise")]
    PendingPromise,

    /// The region would exceed the address space.
    #[error("Region is too large")]
    RegionTooLarge,
}

/// Returned when the bytes of a region are not well-formed.
///
/// Offsets are relative to the start of the region.
#[allow(missing_docs)]
#[derive(Debug, Eq, Error, PartialEq)]
pub enum CorruptRegion
{
    #[error("Region, its size, or its base address is not 8-aligned")]
    Misaligned,

    #[error("Region does not start with the region magic")]
    BadMagic,

    #[error("Region was compacted for base address {stored:#x}, \
             but was loaded as if for {declared:#x}")]
    BaseAddrMismatch{stored: u64, declared: u64},

    #[error("Unknown tag {tag:#x} in record at offset {offset}")]
    UnknownTag{offset: usize, tag: u32},

    #[error("Invalid extra data {extra:#x} for tag {tag:#x} \
             in record at offset {offset}")]
    BadExtraData{offset: usize, tag: u32, extra: u32},

    #[error("Record at offset {offset} extends past the end of the region")]
    Truncated{offset: usize},

    #[error("Reference {stored:#x} at offset {offset} \
             does not denote the start of an object")]
    DanglingReference{offset: usize, stored: u64},

    #[error("Region does not end with a terminator")]
    MissingTerminator,
}

/// Returned when a region cannot be loaded.
///
/// Whatever the error, the release action of the region has run.
#[derive(Debug, Error)]
pub enum LoadError
{
    /// The bytes are not a well-formed region.
    #[error("{0}")]
    Corrupt(#[from] CorruptRegion),

    /// Memory or the backing file could not be obtained.
    #[error("{0}")]
    Resource(#[from] io::Error),
}
