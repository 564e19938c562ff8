use super::{Value, on_heap_tag};

/// Working with promise values.
///
/// A promise is a one-shot slot that is fulfilled from the outside.
impl Value
{
    /// Create an unresolved promise.
    pub fn promise() -> Self
    {
        Self::new_cell(on_heap_tag::PROMISE, None)
    }

    /// Create a promise that has already been resolved.
    pub fn promise_resolved(value: Value) -> Self
    {
        Self::new_cell(on_heap_tag::PROMISE, Some(value))
    }

    /// Resolve an unresolved promise.
    ///
    /// If the promise was already resolved, the value is handed back.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a promise.
    pub fn promise_resolve(&self, value: Value) -> Result<(), Value>
    {
        self.settle_cell(on_heap_tag::PROMISE, value)
    }
}
