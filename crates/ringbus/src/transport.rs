//! Priority → transport routing.
//!
//! Each envelope is placed on exactly one transport, chosen by priority:
//!
//! | Priority   | Transport                        | Semantics                     |
//! |------------|----------------------------------|-------------------------------|
//! | CRITICAL   | shared priority ring             | drop on overflow, caller retries |
//! | HIGH       | submission/completion queue      | best-effort async, completion required |
//! | NORMAL     | unix datagram socket             | at-most-once, no retry        |
//! | LOW        | memory-mapped journal            | durable until the ring wraps  |
//! | BATCH, BACKGROUND | pinned staging region     | deferred bulk drain           |
//!
//! The selector never blocks. When every candidate transport for a
//! priority is saturated it returns `Unavailable` and the caller decides:
//! drop, retry, or spill.

use crate::config::TransportConfig;
use crate::dma::PinnedRegion;
use crate::error::{PlatformError, TransportError, WriteError};
use crate::journal::MappedJournal;
use crate::priority::Priority;
use crate::ring::PriorityRing;
use crate::sq::{CompletionToken, SubmissionQueue};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where an envelope ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Enqueued on a priority ring lane.
    Ring,
    /// Accepted by the submission queue; the token matches the eventual
    /// completion entry.
    Submitted(CompletionToken),
    /// Handed to the datagram socket.
    Datagram,
    /// Appended to the journal.
    Journaled,
    /// Staged in the pinned region.
    Staged,
}

/// Owns the per-priority transports and routes encoded envelopes.
pub struct TransportSelector {
    ring: Arc<PriorityRing>,
    sq: Option<SubmissionQueue>,
    socket: UnixDatagram,
    ingress_path: PathBuf,
    journal: MappedJournal,
    dma: PinnedRegion,
    degrade_warned: AtomicBool,
}

impl TransportSelector {
    /// Build every transport for `config`. Platform failures here are
    /// fatal; each backend attempts its own downgrade path first.
    pub fn new(config: &TransportConfig, ring: Arc<PriorityRing>) -> Result<Self, PlatformError> {
        let sq = if config.disable_submission_queue {
            None
        } else {
            let min_bytes = 4 * (config.max_payload + 16);
            let bytes = min_bytes
                .max(config.sq_depth * 64)
                .next_power_of_two();
            Some(SubmissionQueue::new(bytes, config.sq_depth))
        };

        let socket = UnixDatagram::unbound().map_err(|source| PlatformError::MappingFailed {
            name: config.socket_path().display().to_string(),
            source,
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| PlatformError::MappingFailed {
                name: config.socket_path().display().to_string(),
                source,
            })?;

        let journal = MappedJournal::open(&config.journal_path(), config.journal_bytes)?;
        let dma = PinnedRegion::new(config.dma_bytes)?;

        Ok(Self {
            ring,
            sq,
            socket,
            ingress_path: config.socket_path(),
            journal,
            dma,
            degrade_warned: AtomicBool::new(false),
        })
    }

    /// Route one encoded envelope to the transport its priority selects.
    pub fn route(&self, priority: Priority, frame: &[u8]) -> Result<Route, TransportError> {
        match priority {
            Priority::Critical => {
                self.ring.write_shared(priority, frame)?;
                Ok(Route::Ring)
            }
            Priority::High => match &self.sq {
                Some(sq) => match sq.submit(frame) {
                    Ok(token) => Ok(Route::Submitted(token)),
                    Err(WriteError::Full) => Err(TransportError::Unavailable { priority }),
                    Err(e) => Err(e.into()),
                },
                None => {
                    if !self.degrade_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!("submission queue unavailable, HIGH degrades to the ring");
                    }
                    self.ring.write_shared(priority, frame)?;
                    Ok(Route::Ring)
                }
            },
            Priority::Normal => self.send_datagram(frame, &self.ingress_path).map(|()| Route::Datagram),
            Priority::Low => match self.journal.append(frame) {
                Ok(()) => Ok(Route::Journaled),
                Err(WriteError::Full) => Err(TransportError::Unavailable { priority }),
                Err(e) => Err(e.into()),
            },
            Priority::Batch | Priority::Background => match self.dma.stage(frame) {
                Ok(()) => Ok(Route::Staged),
                Err(WriteError::Full) => Err(TransportError::Unavailable { priority }),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Send an encoded envelope to a peer's ingress socket (NORMAL tier).
    pub fn send_datagram(&self, frame: &[u8], peer: &Path) -> Result<(), TransportError> {
        match self.socket.send_to(frame, peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(TransportError::Unavailable {
                    priority: Priority::Normal,
                })
            }
            Err(e) => Err(TransportError::Datagram { kind: e.kind() }),
        }
    }

    /// The shared priority ring.
    pub fn ring(&self) -> &Arc<PriorityRing> {
        &self.ring
    }

    /// The submission queue, absent when disabled.
    pub fn submission_queue(&self) -> Option<&SubmissionQueue> {
        self.sq.as_ref()
    }

    /// The LOW-tier journal.
    pub fn journal(&self) -> &MappedJournal {
        &self.journal
    }

    /// The BATCH/BACKGROUND staging region.
    pub fn staging(&self) -> &PinnedRegion {
        &self.dma
    }

    /// This node's ingress socket path.
    pub fn ingress_path(&self) -> &Path {
        &self.ingress_path
    }
}
