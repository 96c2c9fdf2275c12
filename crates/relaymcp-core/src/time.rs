//! Timestamp helpers shared by every record that carries `created_at` /
//! `expires_at` fields (Session, AuthorizationCode, TransportSession, ...).

use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch, the unit every `_expiry_ms` config key
/// in spec.md §6 uses.
pub type MillisTimestamp = i64;

/// Current wall-clock time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `now() + duration_ms`, saturating rather than panicking on overflow.
pub fn expiry_from_now(duration_ms: i64) -> DateTime<Utc> {
    now() + chrono::Duration::milliseconds(duration_ms)
}

/// Whether `expires_at` has passed as of `now()`.
pub fn is_expired(expires_at: DateTime<Utc>) -> bool {
    now() >= expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_from_now_is_in_the_future() {
        let expiry = expiry_from_now(10_000);
        assert!(expiry > now());
        assert!(!is_expired(expiry));
    }

    #[test]
    fn past_timestamp_is_expired() {
        let past = now() - chrono::Duration::seconds(1);
        assert!(is_expired(past));
    }
}
