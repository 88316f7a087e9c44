//! Submission/completion queue pair, the HIGH-priority transport.
//!
//! Mirrors the io_uring shape without the syscall surface: callers submit
//! records tagged with a token, the dispatcher consumes them, and every
//! submission is answered by a completion entry on the paired ring.
//! Best-effort async; a submission without an eventual completion is a
//! dispatcher bug, not a silent drop.

use crate::error::{ReadError, WriteError};
use crate::lane::Lane;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Token correlating a completion entry with its submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken(pub u64);

/// Outcome carried by a completion entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The consumer dispatched the submission.
    Done,
    /// The consumer dropped it (corrupt payload, shed load).
    Dropped,
}

const TOKEN_LEN: usize = 8;

/// Paired submit/complete rings.
///
/// Submit side is shared-producer (any agent thread); the consumer side of
/// `submit` and the producer side of `complete` belong to the dispatcher.
pub struct SubmissionQueue {
    submit: Lane,
    complete: Lane,
    /// Shared between submitters; padded so the token counter and the
    /// inflight gauge do not bounce on one line.
    next_token: CachePadded<AtomicU64>,
    inflight: CachePadded<AtomicU64>,
    depth: u64,
}

impl SubmissionQueue {
    /// Queue with `capacity` bytes per ring and at most `depth` submissions
    /// awaiting completion. `capacity` must be a power of two.
    pub fn new(capacity: usize, depth: usize) -> Self {
        Self {
            submit: Lane::new(capacity),
            complete: Lane::new(capacity),
            next_token: CachePadded::new(AtomicU64::new(1)),
            inflight: CachePadded::new(AtomicU64::new(0)),
            depth: depth as u64,
        }
    }

    /// Submit a payload; the returned token matches a future completion.
    pub fn submit(&self, payload: &[u8]) -> Result<CompletionToken, WriteError> {
        if payload.len() + TOKEN_LEN > self.submit.max_message() {
            return Err(WriteError::TooLarge {
                len: payload.len(),
                max: self.submit.max_message() - TOKEN_LEN,
            });
        }
        if self.inflight.load(Ordering::Acquire) >= self.depth {
            return Err(WriteError::Full);
        }

        let token = CompletionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut record = Vec::with_capacity(TOKEN_LEN + payload.len());
        record.extend_from_slice(&token.0.to_le_bytes());
        record.extend_from_slice(payload);
        self.submit.write_shared(&record)?;
        self.inflight.fetch_add(1, Ordering::Release);
        Ok(token)
    }

    /// Pop the next submission (dispatcher side).
    pub fn take(&self, dest: &mut [u8]) -> Result<Option<(CompletionToken, usize)>, ReadError> {
        let mut scratch = vec![0u8; self.submit.max_message()];
        match self.submit.read(&mut scratch) {
            Ok(n) if n >= TOKEN_LEN => {
                let token = CompletionToken(u64::from_le_bytes(
                    scratch[..TOKEN_LEN].try_into().unwrap(),
                ));
                let payload = &scratch[TOKEN_LEN..n];
                if dest.len() < payload.len() {
                    return Err(ReadError::DestTooSmall {
                        have: dest.len(),
                        want: payload.len(),
                    });
                }
                dest[..payload.len()].copy_from_slice(payload);
                Ok(Some((token, payload.len())))
            }
            Ok(_) => Err(ReadError::Corrupt { at: 0 }),
            Err(ReadError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Post the completion for a consumed submission (dispatcher side).
    pub fn post_completion(&self, token: CompletionToken, outcome: Completion) {
        let mut record = [0u8; TOKEN_LEN + 1];
        record[..TOKEN_LEN].copy_from_slice(&token.0.to_le_bytes());
        record[TOKEN_LEN] = match outcome {
            Completion::Done => 0,
            Completion::Dropped => 1,
        };
        // The completion ring is sized like the submit ring and drains at
        // least as fast, but a stalled reaper can still back it up; the
        // inflight cap above bounds the loss window.
        if self.complete.write(&record).is_err() {
            tracing::warn!(token = token.0, "completion ring full, completion lost");
        }
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Reap one completion entry (submitter side).
    pub fn reap(&self) -> Option<(CompletionToken, Completion)> {
        let mut record = [0u8; TOKEN_LEN + 1];
        match self.complete.read(&mut record) {
            Ok(n) if n == TOKEN_LEN + 1 => {
                let token = CompletionToken(u64::from_le_bytes(
                    record[..TOKEN_LEN].try_into().unwrap(),
                ));
                let outcome = if record[TOKEN_LEN] == 0 {
                    Completion::Done
                } else {
                    Completion::Dropped
                };
                Some((token, outcome))
            }
            _ => None,
        }
    }

    /// Submissions awaiting completion.
    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Acquire)
    }

    /// Largest accepted payload.
    pub fn max_payload(&self) -> usize {
        self.submit.max_message() - TOKEN_LEN
    }
}
