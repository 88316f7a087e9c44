//! ringbus - Priority-Tiered Intra-Host IPC Plane
//!
//! Lock-free message fabric for many long-lived agents inside one host:
//! a six-lane priority ring buffer, a fixed 64-byte envelope with CRC32C
//! integrity, and per-priority transports from a shared ring (~50 ns) down
//! to a memory-mapped journal and a pinned bulk-staging region.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        TransportSelector                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ CRITICAL ──► [PriorityRing lane 0]   lock-free, drop on overflow │
//! │ HIGH     ──► [SubmissionQueue]       async, completions required │
//! │ NORMAL   ──► [UnixDatagram]          at-most-once                │
//! │ LOW      ──► [MappedJournal]         durable until wrap          │
//! │ BATCH    ──► [PinnedRegion]          deferred bulk drain         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use ringbus::{Priority, PriorityRing, RingConfig};
//!
//! let ring = PriorityRing::new(RingConfig::default());
//! ring.write(Priority::Critical, b"halt").unwrap();
//!
//! let mut buf = [0u8; 64];
//! let (priority, len) = ring.read_next(&mut buf).unwrap().unwrap();
//! assert_eq!(priority, Priority::Critical);
//! assert_eq!(&buf[..len], b"halt");
//! ```

mod backoff;
mod checksum;
mod config;
mod dma;
mod envelope;
mod error;
mod journal;
mod lane;
mod metrics;
mod priority;
mod ring;
mod shm;
mod sq;
#[cfg(unix)]
mod transport;

pub use backoff::Backoff;
pub use checksum::{crc32c, crc32c_append};
pub use config::{RingConfig, TransportConfig, HIGH_THROUGHPUT_RING, LOW_LATENCY_RING};
pub use dma::PinnedRegion;
pub use envelope::{Envelope, Metadata, BROADCAST, HEADER_LEN, MAGIC};
pub use error::{EnvelopeError, PlatformError, ReadError, TransportError, WriteError};
pub use journal::MappedJournal;
pub use lane::{Lane, LEN_PREFIX};
pub use metrics::{FabricMetrics, MetricsSnapshot};
pub use priority::{Priority, LANE_COUNT};
pub use ring::PriorityRing;
pub use shm::SharedRegion;
pub use sq::{Completion, CompletionToken, SubmissionQueue};
#[cfg(unix)]
pub use transport::{Route, TransportSelector};
