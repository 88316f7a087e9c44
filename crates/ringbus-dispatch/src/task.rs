use ringbus::Priority;

/// One unit of work: a boxed closure plus the scheduling facts the
/// dispatcher keys on.
pub struct WorkItem {
    task: Box<dyn FnOnce() + Send + 'static>,
    /// Lane the work arrived on; selects the worker class.
    pub priority: Priority,
    /// Groups related work onto one worker and feeds the panic breaker.
    pub correlation_id: u32,
    /// Monotonic ns at submission, for queueing-delay accounting.
    pub submitted_ns: u64,
}

impl WorkItem {
    pub fn new<F>(priority: Priority, correlation_id: u32, submitted_ns: u64, task: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            task: Box::new(task),
            priority,
            correlation_id,
            submitted_ns,
        }
    }

    /// Execute the closure, consuming the item.
    pub fn run(self) {
        (self.task)();
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("priority", &self.priority)
            .field("correlation_id", &self.correlation_id)
            .field("submitted_ns", &self.submitted_ns)
            .finish_non_exhaustive()
    }
}
