use core::{fmt, time::Duration};
use std::time::SystemTime;

/**
A Unix timestamp with nanosecond precision.
*/
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /**
    Read the current time from the system clock.

    A clock set before the Unix epoch reads as the epoch itself.
    */
    pub fn now() -> Self {
        Timestamp(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default(),
        )
    }

    pub const fn from_unix(unix_time: Duration) -> Self {
        Timestamp(unix_time)
    }

    pub const fn to_unix(&self) -> Duration {
        self.0
    }

    /**
    The number of nanoseconds since the Unix epoch, saturating at `u64::MAX`.
    */
    pub fn to_unix_nanos(&self) -> u64 {
        self.0.as_nanos().try_into().unwrap_or(u64::MAX)
    }

    pub fn duration_since(self, earlier: Self) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.0.as_secs(), self.0.subsec_nanos())
    }
}
