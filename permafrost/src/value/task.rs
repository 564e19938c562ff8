use super::{Value, on_heap_tag};

/// Working with task values.
///
/// A task is the eventual result of an asynchronous computation.
/// It is settled exactly once, by whoever runs the computation.
impl Value
{
    /// Create a pending task.
    pub fn task() -> Self
    {
        Self::new_cell(on_heap_tag::TASK, None)
    }

    /// Create a task that has already completed with the given result.
    pub fn task_resolved(result: Value) -> Self
    {
        Self::new_cell(on_heap_tag::TASK, Some(result))
    }

    /// Complete a pending task with the given result.
    ///
    /// If the task was already completed, the result is handed back.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a task.
    pub fn task_resolve(&self, result: Value) -> Result<(), Value>
    {
        self.settle_cell(on_heap_tag::TASK, result)
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::value::Val};

    #[test]
    fn resolve_once()
    {
        let task = Value::task();
        assert!(matches!(task.borrow(), Val::Task(None)));

        task.task_resolve(Value::scalar_from_u8(1)).unwrap();
        let rejected = task.task_resolve(Value::scalar_from_u8(2)).unwrap_err();
        assert!(matches!(rejected.borrow(), Val::Scalar(2)));

        match task.borrow() {
            Val::Task(Some(result)) =>
                assert!(matches!(result.borrow(), Val::Scalar(1))),
            other => panic!("Unexpected val: {:?}", other),
        }
    }

    #[test]
    fn resolved_task_releases_result()
    {
        let result = Value::string_from_bytes(b"done").unwrap();
        let task = Value::task_resolved(result.clone());
        drop(task);
        let header = result.get_on_heap_header().unwrap();
        assert_eq!(header.ref_count.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic(expected = "cannot be settled")]
    fn resolve_promise_as_task()
    {
        let promise = Value::promise();
        let _ = promise.task_resolve(Value::scalar_from_u8(0));
    }
}
