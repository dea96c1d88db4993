use crate::error::BlockError;
use crate::model::StartTime;
use std::time::Duration;
use time::{OffsetDateTime, Time, UtcOffset};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock in a fixed local offset.
///
/// The offset is resolved once at startup; `time` refuses to read it once the
/// process has more than one thread.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Must be called while the process is still single-threaded. Falls back to UTC.
    ///
    /// The offset is read once and kept for the life of the process. A start
    /// time that falls on the other side of a daylight-saving change resolves
    /// one hour early or late.
    pub fn detect_local() -> Self {
        Self::new(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Next instant at `at`: today if still ahead of `now`, otherwise tomorrow.
pub fn next_occurrence(at: StartTime, now: OffsetDateTime) -> Result<OffsetDateTime, BlockError> {
    let time = Time::from_hms(at.hour(), at.minute(), 0)
        .map_err(|_| BlockError::InvalidStartTime(at.to_string()))?;
    let today = now.replace_time(time);
    if today > now {
        Ok(today)
    } else {
        Ok(today + time::Duration::days(1))
    }
}

/// How long to count down before enforcement begins.
pub fn countdown(at: StartTime, now: OffsetDateTime) -> Result<(OffsetDateTime, Duration), BlockError> {
    let target = next_occurrence(at, now)?;
    let wait = Duration::try_from(target - now)
        .map_err(|e| BlockError::Config(format!("start time {at} is not ahead of now: {e}")))?;
    Ok((target, wait))
}
