//! Shared timestamp/event helpers for records and command envelopes.

use crate::core::schemas;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Local wall-clock time truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Returns local time as ISO-8601 with second precision (e.g. `2025-01-10T08:30:00`).
pub fn now_iso() -> String {
    format_timestamp(&now_local())
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(schemas::TIMESTAMP_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DDTHH:MM:SS`, with or without a fractional suffix.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S%.f")
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), schemas::DATE_FORMAT)
}

/// The timestamp a new record receives: the wall clock, unless the clock is
/// behind the latest persisted record. Always a whole second, never earlier
/// than `latest` even when `latest` carries a fraction.
pub fn monotonic_after(now: NaiveDateTime, latest: Option<NaiveDateTime>) -> NaiveDateTime {
    let now = floor_to_second(now);
    match latest.map(ceil_to_second) {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}

fn floor_to_second(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

fn ceil_to_second(ts: NaiveDateTime) -> NaiveDateTime {
    let floor = floor_to_second(ts);
    if floor == ts {
        return ts;
    }
    floor
        .checked_add_signed(chrono::TimeDelta::seconds(1))
        .unwrap_or(floor)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_iso(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
