use std::num::NonZeroU64;

/// Configuration of a [`Compactor`][`super::Compactor`].
#[derive(Clone, Debug)]
pub struct CompactorConfig
{
    /// The address the region is expected to be loaded at.
    ///
    /// References are stored as this address plus an offset.
    /// If [`None`], references are plain offsets into the region.
    /// The address must be a multiple of 8, so that references
    /// are never mistaken for scalars.
    /// Loading a region at its base address makes fixup a no-op rewrite,
    /// but a region can always be loaded elsewhere.
    pub base_addr: Option<NonZeroU64>,

    /// Whether structurally equal strings, byte arrays, and
    /// big integers are stored only once.
    pub max_sharing: bool,

    /// The number of bytes to reserve for the region up front.
    pub initial_capacity: usize,
}

impl Default for CompactorConfig
{
    fn default() -> Self
    {
        Self{
            base_addr: None,
            max_sharing: true,
            initial_capacity: 4096,
        }
    }
}

impl CompactorConfig
{
    /// Set the base address.
    ///
    /// # Panics
    ///
    /// Panics if the base address is not a multiple of 8.
    pub fn with_base_addr(mut self, base_addr: NonZeroU64) -> Self
    {
        assert!(base_addr.get() % 8 == 0, "Base address must be 8-aligned");
        self.base_addr = Some(base_addr);
        self
    }

    /// Enable or disable maximal sharing.
    pub fn with_max_sharing(mut self, max_sharing: bool) -> Self
    {
        self.max_sharing = max_sharing;
        self
    }

    /// Set the number of bytes to reserve up front.
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self
    {
        self.initial_capacity = initial_capacity;
        self
    }
}
