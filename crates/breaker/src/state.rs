//! Breaker phases and the state record stored at `<prefix>:state:<key>`.
//!
//! The record is ASCII text of the form `"<phase> <period-end-unix-nanos>"`,
//! for example `open 1717171717000000000`. An absent key means the breaker
//! is closed; that convention lives in [`StateRead`] rather than in the
//! codec so the malformed path stays observable.

use std::{
    fmt,
    ops::Add,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use thiserror::Error;

/// Phase of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Calls pass through and their outcomes are counted.
    Closed,
    /// A single trial call is probing whether the dependency recovered.
    HalfOpen,
    /// Calls are rejected until the open period ends.
    Open,
}

impl Phase {
    /// Name used in the stored record.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Phase {
    type Err = StateDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "half" => Ok(Self::HalfOpen),
            "open" => Ok(Self::Open),
            other => Err(StateDecodeError::UnknownPhase(other.to_owned())),
        }
    }
}

/// Wall-clock instant as nanoseconds since the Unix epoch.
///
/// Every process sharing a breaker compares these values, so the type uses
/// the system clock rather than a monotonic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnixNanos(i64);

impl UnixNanos {
    /// The Unix epoch, used as the period end of a closed breaker.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw nanosecond count.
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Reads the system clock. Instants before the epoch clamp to zero and
    /// instants past the `i64` range clamp to its maximum.
    #[must_use]
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX));
        Self(nanos)
    }

    /// Raw nanosecond count.
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Instant `duration` earlier, saturating at `i64::MIN`.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_nanos(duration)))
    }
}

impl Add<Duration> for UnixNanos {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(duration_nanos(rhs)))
    }
}

impl fmt::Display for UnixNanos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Errors produced when a stored state record cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StateDecodeError {
    /// The phase field is not one of `closed`, `half`, `open`.
    #[error("unknown breaker phase `{0}`")]
    UnknownPhase(String),

    /// The period-end field is not a base-10 integer.
    #[error("invalid period end `{0}`")]
    InvalidTimestamp(String),

    /// The record has more than two whitespace-separated fields.
    #[error("state record has {0} fields, expected at most 2")]
    TooManyFields(usize),

    /// The record is present but contains no fields.
    #[error("state record is empty")]
    Empty,

    /// The record is not valid UTF-8.
    #[error("state record is not valid UTF-8")]
    NotUtf8,
}

/// Phase plus the instant the current period ends.
///
/// For [`Phase::Open`] the period end is when a trial may start; for
/// [`Phase::HalfOpen`] it is when an unfinished trial is considered stale.
/// Closed records carry [`UnixNanos::ZERO`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateRecord {
    /// Current phase.
    pub phase: Phase,
    /// End of the current period.
    pub period_end: UnixNanos,
}

impl StateRecord {
    /// The implicit record of a breaker with no stored state.
    pub const CLOSED: Self = Self { phase: Phase::Closed, period_end: UnixNanos::ZERO };

    /// Creates a record.
    #[must_use]
    pub const fn new(phase: Phase, period_end: UnixNanos) -> Self {
        Self { phase, period_end }
    }

    /// Renders the stored form, `"<phase> <period-end>"`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{} {}", self.phase, self.period_end)
    }

    /// Whether a transition expecting `self` may replace `current`.
    ///
    /// Closed records always match each other. Open and half-open records
    /// match only at the same period end, which tells repeated trips apart.
    #[must_use]
    pub fn guards(&self, current: &Self) -> bool {
        match (self.phase, current.phase) {
            (Phase::Closed, Phase::Closed) => true,
            (expected, found) => expected == found && self.period_end == current.period_end,
        }
    }

    /// Parses the stored form.
    ///
    /// A record holding only a phase decodes with a zero period end.
    ///
    /// # Errors
    ///
    /// Returns [`StateDecodeError`] when the record is empty, has more than
    /// two fields, names an unknown phase, or has a non-integer period end.
    pub fn decode(raw: &str) -> Result<Self, StateDecodeError> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        match fields.as_slice() {
            [] => Err(StateDecodeError::Empty),
            [phase] => Ok(Self::new(phase.parse::<Phase>()?, UnixNanos::ZERO)),
            [phase, period_end] => {
                let phase: Phase = phase.parse()?;
                let nanos = period_end
                    .parse::<i64>()
                    .map_err(|_| StateDecodeError::InvalidTimestamp((*period_end).to_owned()))?;
                Ok(Self::new(phase, UnixNanos(nanos)))
            },
            _ => Err(StateDecodeError::TooManyFields(fields.len())),
        }
    }
}

impl Default for StateRecord {
    fn default() -> Self {
        Self::CLOSED
    }
}

impl fmt::Display for StateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.phase, self.period_end)
    }
}

/// Result of reading the state key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRead {
    /// No record is stored; the breaker is closed.
    Absent,
    /// A record is stored but cannot be parsed.
    Malformed(StateDecodeError),
    /// A valid record is stored.
    Present(StateRecord),
}

impl StateRead {
    /// Classifies the raw value of the state key.
    #[must_use]
    pub fn from_value(value: Option<Bytes>) -> Self {
        let Some(value) = value else {
            return Self::Absent;
        };
        match std::str::from_utf8(&value) {
            Ok(raw) => match StateRecord::decode(raw) {
                Ok(record) => Self::Present(record),
                Err(err) => Self::Malformed(err),
            },
            Err(_) => Self::Malformed(StateDecodeError::NotUtf8),
        }
    }

    /// Resolves the read to a record, treating absence as [`StateRecord::CLOSED`].
    ///
    /// # Errors
    ///
    /// Returns the decode error of a malformed record.
    pub fn into_record(self) -> Result<StateRecord, StateDecodeError> {
        match self {
            Self::Absent => Ok(StateRecord::CLOSED),
            Self::Malformed(err) => Err(err),
            Self::Present(record) => Ok(record),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::closed("closed 0", StateRecord::CLOSED)]
    #[case::open(
        "open 1700000000000000000",
        StateRecord::new(Phase::Open, UnixNanos(1_700_000_000_000_000_000))
    )]
    #[case::half("half 42", StateRecord::new(Phase::HalfOpen, UnixNanos(42)))]
    #[case::negative_period_end("open -5", StateRecord::new(Phase::Open, UnixNanos(-5)))]
    #[case::phase_only("open", StateRecord::new(Phase::Open, UnixNanos::ZERO))]
    #[case::extra_whitespace("  half\t7 ", StateRecord::new(Phase::HalfOpen, UnixNanos(7)))]
    fn decode_valid_records(#[case] raw: &str, #[case] expected: StateRecord) {
        assert_eq!(StateRecord::decode(raw).unwrap(), expected);
    }

    #[rstest]
    #[case::empty("", StateDecodeError::Empty)]
    #[case::blank("   ", StateDecodeError::Empty)]
    #[case::unknown_phase("ajar 10", StateDecodeError::UnknownPhase("ajar".into()))]
    #[case::capitalized_phase("Open 10", StateDecodeError::UnknownPhase("Open".into()))]
    #[case::long_phase_name("half_open 10", StateDecodeError::UnknownPhase("half_open".into()))]
    #[case::float_timestamp("open 1.5", StateDecodeError::InvalidTimestamp("1.5".into()))]
    #[case::word_timestamp("open soon", StateDecodeError::InvalidTimestamp("soon".into()))]
    #[case::overflowing_timestamp(
        "open 99999999999999999999",
        StateDecodeError::InvalidTimestamp("99999999999999999999".into())
    )]
    #[case::three_fields("open 1 2", StateDecodeError::TooManyFields(3))]
    fn decode_malformed_records(#[case] raw: &str, #[case] expected: StateDecodeError) {
        assert_eq!(StateRecord::decode(raw).unwrap_err(), expected);
    }

    #[test]
    fn encode_uses_wire_names() {
        assert_eq!(StateRecord::CLOSED.encode(), "closed 0");
        assert_eq!(StateRecord::new(Phase::HalfOpen, UnixNanos(9)).encode(), "half 9");
        assert_eq!(StateRecord::new(Phase::Open, UnixNanos(-1)).encode(), "open -1");
    }

    #[test]
    fn display_matches_encoding() {
        let record = StateRecord::new(Phase::Open, UnixNanos(12));
        assert_eq!(record.to_string(), record.encode());
        assert_eq!(Phase::HalfOpen.to_string(), "half");
    }

    #[rstest]
    #[case::closed_ignores_period_end(StateRecord::CLOSED, "closed 77", true)]
    #[case::same_open(StateRecord::new(Phase::Open, UnixNanos(5)), "open 5", true)]
    #[case::repeated_trip(StateRecord::new(Phase::Open, UnixNanos(5)), "open 6", false)]
    #[case::phase_changed(StateRecord::new(Phase::Open, UnixNanos(5)), "half 5", false)]
    #[case::reset_underneath(StateRecord::new(Phase::HalfOpen, UnixNanos(5)), "closed 0", false)]
    fn guard_compares_period_end_outside_closed(
        #[case] expected: StateRecord,
        #[case] current: &str,
        #[case] guards: bool,
    ) {
        assert_eq!(expected.guards(&StateRecord::decode(current).unwrap()), guards);
    }

    #[test]
    fn state_read_absent_is_closed() {
        let read = StateRead::from_value(None);
        assert_eq!(read, StateRead::Absent);
        assert_eq!(read.into_record().unwrap(), StateRecord::CLOSED);
    }

    #[test]
    fn state_read_present() {
        let read = StateRead::from_value(Some(Bytes::from_static(b"open 100")));
        assert_eq!(read, StateRead::Present(StateRecord::new(Phase::Open, UnixNanos(100))));
    }

    #[test]
    fn state_read_malformed_is_not_coerced() {
        let read = StateRead::from_value(Some(Bytes::from_static(b"shut 100")));
        assert!(matches!(read, StateRead::Malformed(StateDecodeError::UnknownPhase(_))));
        assert!(read.into_record().is_err());
    }

    #[test]
    fn state_read_empty_value_is_malformed() {
        let read = StateRead::from_value(Some(Bytes::new()));
        assert_eq!(read, StateRead::Malformed(StateDecodeError::Empty));
    }

    #[test]
    fn state_read_rejects_invalid_utf8() {
        let read = StateRead::from_value(Some(Bytes::from_static(&[0xff, 0xfe])));
        assert_eq!(read, StateRead::Malformed(StateDecodeError::NotUtf8));
    }

    #[test]
    fn unix_nanos_arithmetic_saturates() {
        let max = UnixNanos(i64::MAX - 1);
        assert_eq!((max + Duration::from_secs(1)).as_nanos(), i64::MAX);
        let min = UnixNanos(i64::MIN + 1);
        assert_eq!(min.saturating_sub(Duration::from_secs(1)).as_nanos(), i64::MIN);
        assert_eq!((UnixNanos(10) + Duration::from_nanos(5)).as_nanos(), 15);
    }

    #[test]
    fn unix_nanos_now_is_after_epoch() {
        assert!(UnixNanos::now() > UnixNanos::ZERO);
    }

    fn any_phase() -> impl Strategy<Value = Phase> {
        prop_oneof![Just(Phase::Closed), Just(Phase::HalfOpen), Just(Phase::Open)]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(phase in any_phase(), nanos in any::<i64>()) {
            let record = StateRecord::new(phase, UnixNanos(nanos));
            prop_assert_eq!(StateRecord::decode(&record.encode()), Ok(record));
        }

        #[test]
        fn decode_never_panics(raw in ".{0,40}") {
            let _ = StateRecord::decode(&raw);
        }
    }
}
