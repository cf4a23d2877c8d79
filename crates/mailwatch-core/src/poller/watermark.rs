//! Per-account polling cursor.

use chrono::{DateTime, Utc};

/// "Messages newer than T" boundary for one account.
///
/// Owned by exactly one poller and never shared. The only way to move it is
/// [`advance_to`](Self::advance_to), which ignores instants in the past, so
/// the cursor is monotonically non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Starts the cursor at `at`.
    #[must_use]
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Starts the cursor at the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// The boundary instant.
    #[must_use]
    pub const fn get(&self) -> DateTime<Utc> {
        self.0
    }

    /// Moves the cursor forward to `at`. Returns whether it moved.
    pub fn advance_to(&mut self, at: DateTime<Utc>) -> bool {
        if at > self.0 {
            self.0 = at;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn advances_forward() {
        let mut mark = Watermark::new(at(1_000));
        assert!(mark.advance_to(at(1_060)));
        assert_eq!(mark.get(), at(1_060));
    }

    #[test]
    fn never_moves_back() {
        let mut mark = Watermark::new(at(1_000));
        assert!(!mark.advance_to(at(999)));
        assert!(!mark.advance_to(at(1_000)));
        assert_eq!(mark.get(), at(1_000));
    }

    proptest! {
        #[test]
        fn monotonic_under_any_sequence(steps in proptest::collection::vec(-120i64..120, 0..32)) {
            let mut mark = Watermark::new(at(1_700_000_000));
            for step in steps {
                let before = mark;
                mark.advance_to(before.get() + Duration::seconds(step));
                prop_assert!(mark >= before);
            }
        }
    }
}
