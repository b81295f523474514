use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp recorded while the clock is not yet synchronized.
pub const UNSYNCED_TIMESTAMP: &str = "00:00";

/// Clocks reading less than one day past the epoch are treated as unsynchronized.
pub const SYNC_THRESHOLD_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone, Copy)]
struct ProcessTime {
    utc_offset_secs: i32,
    correction_ms: i64,
}

static PROCESS_TIME: RwLock<ProcessTime> = RwLock::new(ProcessTime {
    utc_offset_secs: 0,
    correction_ms: 0,
});

fn process_time() -> ProcessTime {
    match PROCESS_TIME.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

pub(crate) fn set_utc_offset_secs(secs: i32) {
    let mut guard = PROCESS_TIME.write().unwrap_or_else(|p| p.into_inner());
    guard.utc_offset_secs = secs;
}

/// Offset (NTP minus host clock) applied by [`SystemClock`].
pub(crate) fn set_correction_ms(ms: i64) {
    let mut guard = PROCESS_TIME.write().unwrap_or_else(|p| p.into_inner());
    guard.correction_ms = ms;
}

pub(crate) fn host_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub trait Clock {
    fn unix_seconds(&self) -> i64;
    fn utc_offset_secs(&self) -> i32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn unix_seconds(&self) -> i64 {
        (**self).unix_seconds()
    }

    fn utc_offset_secs(&self) -> i32 {
        (**self).utc_offset_secs()
    }
}

/// Host clock adjusted by the process-wide NTP correction and timezone offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> i64 {
        let time = process_time();
        host_unix_ms()
            .saturating_add(time.correction_ms)
            .div_euclid(1000)
    }

    fn utc_offset_secs(&self) -> i32 {
        process_time().utc_offset_secs
    }
}

pub fn is_synchronized(clock: &impl Clock) -> bool {
    clock.unix_seconds() >= SYNC_THRESHOLD_SECS
}

/// `HH:MM` (24-hour) in the given offset, or [`UNSYNCED_TIMESTAMP`] before sync.
pub fn format_hhmm(unix_secs: i64, utc_offset_secs: i32) -> String {
    if unix_secs < SYNC_THRESHOLD_SECS {
        return UNSYNCED_TIMESTAMP.to_string();
    }
    let offset = FixedOffset::east_opt(utc_offset_secs).unwrap_or_else(|| Utc.fix());
    match DateTime::<Utc>::from_timestamp(unix_secs, 0) {
        Some(utc) => utc.with_timezone(&offset).format("%H:%M").to_string(),
        None => UNSYNCED_TIMESTAMP.to_string(),
    }
}

pub fn current_timestamp(clock: &impl Clock) -> String {
    format_hhmm(clock.unix_seconds(), clock.utc_offset_secs())
}

#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedClock {
    pub unix_seconds: i64,
    pub utc_offset_secs: i32,
}

#[cfg(test)]
impl Clock for FixedClock {
    fn unix_seconds(&self) -> i64 {
        self.unix_seconds
    }

    fn utc_offset_secs(&self) -> i32 {
        self.utc_offset_secs
    }
}
