//! Replay guard (SPEC_FULL.md §4.1): every signed request carries an
//! ISO-8601 timestamp; reject with `ExpiredRequest` if the drift against
//! server time exceeds `max_clock_drift_seconds`.

use chrono::{DateTime, Utc};
use hub_core::error::HubError;

pub fn check_clock_drift(
    request_ts: DateTime<Utc>,
    server_now: DateTime<Utc>,
    max_drift_seconds: i64,
) -> Result<(), HubError> {
    let drift = (server_now - request_ts).num_seconds().abs();
    if drift > max_drift_seconds {
        return Err(HubError::ExpiredRequest {
            drift_seconds: drift,
            max_seconds: max_drift_seconds,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn within_drift_passes() {
        let now = Utc::now();
        assert!(check_clock_drift(now - Duration::seconds(10), now, 300).is_ok());
    }

    #[test]
    fn beyond_drift_rejected() {
        let now = Utc::now();
        let err = check_clock_drift(now - Duration::seconds(400), now, 300).unwrap_err();
        assert!(matches!(err, HubError::ExpiredRequest { .. }));
    }
}
