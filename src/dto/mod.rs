use time::OffsetDateTime;

pub mod backend;
pub mod health;
pub mod messages;
pub mod snapshot;
pub mod validation;

/// Current wall-clock time as unix milliseconds, the unit used on the wire.
pub fn now_millis() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or_default()
}
