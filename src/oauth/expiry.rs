//! Expiry policy for stored credentials.
//!
//! Pure functions of a record and the current instant. No refresh happens
//! here: the provider issues no refresh tokens, so near-expiry only prompts an
//! admin to re-authorize.

use crate::credentials::CredentialRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Window before expiry in which re-authorization is suggested.
pub const NEAR_EXPIRY_WINDOW_MS: i64 = DAY_MS;

/// Label used once a credential has expired.
pub const EXPIRED_LABEL: &str = "Expired";

/// Human-facing summary of a credential's remaining lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExpirationInfo {
    /// RFC 3339 instant, absent only if `expires_at` is out of chrono's range.
    pub expires_at: Option<String>,
    pub time_until_expiration: String,
    pub is_expired: bool,
}

/// True when less than 24 hours remain. Exactly 24 hours is not near expiry.
pub fn is_near_expiry(record: &CredentialRecord, now_millis: i64) -> bool {
    record.expires_at.saturating_sub(now_millis) < NEAR_EXPIRY_WINDOW_MS
}

/// Describes how long `record` has left.
///
/// Units are floored: days (plus hours when non-zero) from one day up, whole
/// hours from one hour up, otherwise whole minutes. 90 seconds reads as
/// "1 minute".
pub fn describe_expiration(record: &CredentialRecord, now_millis: i64) -> ExpirationInfo {
    let expires_at = DateTime::<Utc>::from_timestamp_millis(record.expires_at)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true));
    let remaining = record.expires_at.saturating_sub(now_millis);

    if remaining <= 0 {
        return ExpirationInfo {
            expires_at,
            time_until_expiration: EXPIRED_LABEL.to_string(),
            is_expired: true,
        };
    }

    ExpirationInfo {
        expires_at,
        time_until_expiration: format_remaining(remaining),
        is_expired: false,
    }
}

fn format_remaining(remaining_ms: i64) -> String {
    let days = remaining_ms / DAY_MS;
    let hours = (remaining_ms % DAY_MS) / HOUR_MS;

    if days > 0 {
        let mut label = plural(days, "day");
        if hours > 0 {
            label.push_str(", ");
            label.push_str(&plural(hours, "hour"));
        }
        label
    } else if hours > 0 {
        plural(hours, "hour")
    } else {
        plural((remaining_ms % HOUR_MS) / MINUTE_MS, "minute")
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("{} {}", count, unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
