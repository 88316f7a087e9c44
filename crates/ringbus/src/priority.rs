use crate::error::EnvelopeError;

/// Number of priority lanes in a [`PriorityRing`](crate::PriorityRing).
pub const LANE_COUNT: usize = 6;

/// Message priority, selecting both the ring lane and the transport.
///
/// Lower numeric value means higher urgency. The discriminants are part of
/// the wire format (byte 21 of the envelope header) and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Ultra-low-latency control signals (~50 ns target).
    Critical = 0,
    /// Latency-sensitive traffic routed through the submission queue.
    High = 1,
    /// Regular traffic over the datagram socket, at-most-once.
    Normal = 2,
    /// Journaled traffic, durable until the journal wraps.
    Low = 3,
    /// Bulk payloads staged in the pinned region for deferred drain.
    Batch = 4,
    /// Housekeeping traffic (health events, probes).
    Background = 5,
}

impl Priority {
    /// All priorities in drain order (highest urgency first).
    pub const ALL: [Priority; LANE_COUNT] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Batch,
        Priority::Background,
    ];

    /// Lane index for this priority.
    #[inline]
    pub const fn lane(self) -> usize {
        self as usize
    }

    /// True for priorities that must only run on performance-class workers.
    #[inline]
    pub const fn is_latency_critical(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }
}

impl TryFrom<u8> for Priority {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Critical),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::Low),
            4 => Ok(Priority::Batch),
            5 => Ok(Priority::Background),
            other => Err(EnvelopeError::BadPriority { value: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_indices_are_dense() {
        for (i, p) in Priority::ALL.iter().enumerate() {
            assert_eq!(p.lane(), i);
        }
    }

    #[test]
    fn test_bad_priority_rejected() {
        assert!(Priority::try_from(5).is_ok());
        assert!(matches!(
            Priority::try_from(6),
            Err(EnvelopeError::BadPriority { value: 6 })
        ));
    }

    #[test]
    fn test_latency_class() {
        assert!(Priority::Critical.is_latency_critical());
        assert!(Priority::High.is_latency_critical());
        assert!(!Priority::Normal.is_latency_critical());
        assert!(!Priority::Background.is_latency_critical());
    }
}
