//! ringbus-dispatch - Work-Stealing Dispatcher with P/E-Core Affinity
//!
//! Executes fabric work on a thread pool partitioned into performance-class
//! and efficiency-class workers. Each worker owns a Chase-Lev deque: the
//! owner pushes and pops the bottom (LIFO, cache-warm), thieves take the
//! top (FIFO, oldest first). Stealing stays inside a class, so
//! latency-critical work never lands on an efficiency core.
//!
//! ```text
//! submit(priority, correlation_id, task)
//!        │
//!        ▼  hash(correlation_id) % class size, spill within class
//! ┌───────────────┐     ┌───────────────┐
//! │ P workers     │     │ E workers     │
//! │ [deque][deque]│     │ [deque][deque]│   steal: randomized,
//! │  CRITICAL/HIGH│     │  NORMAL..BKGND│   class-confined
//! └───────────────┘     └───────────────┘
//! ```
//!
//! Panics inside a task are caught and counted; a correlation id that
//! keeps panicking trips the caller's circuit-breaker callback.

mod deque;
mod dispatcher;
mod error;
mod hooks;
mod metrics;
mod task;
mod worker;

pub use deque::{Steal, StealDeque};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::DispatchError;
pub use hooks::{pin_current_thread, CoreType, HostHooks, SystemHooks};
pub use metrics::{DispatchMetrics, DispatchSnapshot};
pub use task::WorkItem;
pub use worker::{CircuitBreaker, WorkerClass, PANIC_BREAKER_LIMIT};
