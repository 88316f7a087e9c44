//! Error types for the IPC plane.

use crate::priority::Priority;
use thiserror::Error;

/// Errors surfaced by envelope encoding and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The magic tag did not match the fabric sentinel.
    #[error("unknown magic tag {found:#010x}")]
    UnknownMagic {
        /// The tag found in the first four bytes.
        found: u32,
    },

    /// Payload length exceeds the configured maximum.
    #[error("payload of {len} bytes exceeds maximum {max}")]
    TooLarge {
        /// Actual payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Checksum recomputation did not match the stored value.
    #[error("checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CorruptMessage {
        /// Checksum carried in the header.
        stored: u32,
        /// Checksum recomputed over header and payload.
        computed: u32,
    },

    /// The buffer ended before the declared payload length.
    #[error("payload truncated ({have} of {want} bytes)")]
    TruncatedPayload {
        /// Bytes present after the header.
        have: usize,
        /// Bytes the header declared.
        want: usize,
    },

    /// The priority byte is outside the defined range.
    #[error("bad priority byte {value}")]
    BadPriority {
        /// The offending byte.
        value: u8,
    },
}

/// Errors surfaced by lane writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The lane has no room for the record. Caller-retryable.
    #[error("lane is full")]
    Full,

    /// A single message may not exceed a quarter of the lane size.
    #[error("message of {len} bytes exceeds lane limit {max}")]
    TooLarge {
        /// Record payload length.
        len: usize,
        /// Largest accepted payload for this lane.
        max: usize,
    },
}

impl WriteError {
    /// True when the caller may retry after backoff.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Errors surfaced by lane reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// No published record available.
    #[error("lane is empty")]
    Empty,

    /// A corrupt length prefix was found; the lane is degraded until the
    /// producer sequence advances past the poisoned region.
    #[error("lane corrupt at sequence {at}")]
    Corrupt {
        /// Consumer sequence at which corruption was observed.
        at: u64,
    },

    /// Destination buffer is smaller than the record.
    #[error("destination of {have} bytes cannot hold {want}-byte record")]
    DestTooSmall {
        /// Destination capacity.
        have: usize,
        /// Record length.
        want: usize,
    },
}

/// Errors surfaced by the transport selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Every candidate transport for the priority is saturated.
    /// The caller decides: drop, retry, or spill.
    #[error("all transports for priority {priority:?} are saturated")]
    Unavailable {
        /// Priority whose transports were exhausted.
        priority: Priority,
    },

    /// The ring lane rejected the record.
    #[error(transparent)]
    Ring(#[from] WriteError),

    /// The datagram socket rejected the payload.
    #[error("datagram send failed: {kind:?}")]
    Datagram {
        /// The I/O error kind, preserved without the boxed error so the
        /// variant stays `Copy`.
        kind: std::io::ErrorKind,
    },
}

impl TransportError {
    /// True when the caller may retry after backoff.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Ring(e) => e.is_recoverable(),
            Self::Datagram { kind } => matches!(kind, std::io::ErrorKind::WouldBlock),
        }
    }
}

/// Platform failures during initialization. Fatal at startup, but every
/// constructor attempts the documented downgrade path first.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Huge-page or regular mapping could not be established.
    #[error("mapping {name} failed: {source}")]
    MappingFailed {
        /// Region or file name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The pinned region could not be locked against paging.
    #[error("mlock of {len} bytes failed: {source}")]
    PagingFailed {
        /// Region length in bytes.
        len: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Worker could not be pinned to its CPU.
    #[error("core affinity for cpu {cpu} failed: {source}")]
    CoreAffinityFailed {
        /// Target CPU index.
        cpu: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
