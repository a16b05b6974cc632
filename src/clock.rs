#[cfg(test)] use mockall::automock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source for a session.
///
/// Timers (keepalive deadlines, resend deadlines) work in wall-clock milliseconds while
///  message timestamps (`sendingTimeEpoch`, `requestTimestamp`) are nanoseconds since
///  the epoch. The two are deliberately not unified: the protocol transmits nanosecond
///  timestamps but its liveness rules are defined in milliseconds.
#[cfg_attr(test, automock)]
pub trait Clock {
    fn time_millis(&self) -> i64;

    fn nano_timestamp(&self) -> i64;
}

/// Production clock backed by [`SystemTime`].
pub struct SystemClock;

impl Clock for SystemClock {
    fn time_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after the epoch")
            .as_millis() as i64
    }

    fn nano_timestamp(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after the epoch")
            .as_nanos() as i64
    }
}
