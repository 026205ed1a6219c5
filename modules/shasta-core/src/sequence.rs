//! Delta log sequence ids.
//!
//! Ids are assigned by the delta log append and nothing else. They follow the
//! stream id shape `<millis>-<seq>` so the same value round-trips through the
//! cache unchanged.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceId {
    pub millis: u64,
    pub seq: u64,
}

impl SequenceId {
    /// Lower bound of every assigned id. Tailing "after ZERO" reads the whole log.
    pub const ZERO: SequenceId = SequenceId { millis: 0, seq: 0 };

    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// The next id to hand out after `self`, given the current wall clock.
    ///
    /// Never goes backwards: if the clock is behind the last id, the
    /// millisecond part is held and the counter advances instead.
    pub fn next_after(&self, now_millis: u64) -> SequenceId {
        if now_millis > self.millis {
            SequenceId::new(now_millis, 0)
        } else {
            SequenceId::new(self.millis, self.seq + 1)
        }
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for SequenceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = match s.split_once('-') {
            Some((m, q)) => (m, q),
            None => (s, "0"),
        };
        let millis = millis
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidSequence(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidSequence(s.to_string()))?;
        Ok(SequenceId { millis, seq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_stream_id() {
        let id: SequenceId = "1700000000000-4".parse().unwrap();
        assert_eq!(id, SequenceId::new(1_700_000_000_000, 4));
        assert_eq!(id.to_string(), "1700000000000-4");
    }

    #[test]
    fn test_parses_bare_millis() {
        let id: SequenceId = "42".parse().unwrap();
        assert_eq!(id, SequenceId::new(42, 0));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("abc-1".parse::<SequenceId>().is_err());
        assert!("1-x".parse::<SequenceId>().is_err());
        assert!("".parse::<SequenceId>().is_err());
    }

    #[test]
    fn test_orders_by_millis_then_counter() {
        assert!(SequenceId::new(1, 9) < SequenceId::new(2, 0));
        assert!(SequenceId::new(2, 0) < SequenceId::new(2, 1));
        assert!(SequenceId::ZERO < SequenceId::new(0, 1));
    }

    #[test]
    fn test_next_after_never_goes_backwards() {
        let last = SequenceId::new(100, 3);
        assert_eq!(last.next_after(101), SequenceId::new(101, 0));
        assert_eq!(last.next_after(100), SequenceId::new(100, 4));
        // Clock skew: wall clock behind the last id.
        assert_eq!(last.next_after(50), SequenceId::new(100, 4));
    }
}
