use thiserror::Error;

/// Errors surfaced by work submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The dispatcher is shutting down and takes no new work.
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// Every eligible worker queue in the priority class is full.
    /// Caller-retryable; spilling never crosses into the other class.
    #[error("all {class} worker queues are full")]
    QueueFull {
        /// The class whose queues rejected the item.
        class: &'static str,
    },

    /// The dispatcher was built with zero workers for a class that
    /// received work.
    #[error("no {class} workers configured")]
    NoWorkers {
        /// The missing class.
        class: &'static str,
    },
}

impl DispatchError {
    /// True when the caller may retry after backoff.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}
