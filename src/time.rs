use chrono::{DateTime, Utc};

/// Current UTC instant as epoch milliseconds.
///
/// All stored and cached timestamps use this representation; `DateTime`
/// values exist only at the API boundary.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// RFC 3339 rendering for API responses. Out-of-range inputs render as the
/// epoch rather than failing the response.
pub fn rfc3339(ms: i64) -> String {
    from_ms(ms)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trips_known_instant() {
        // 2026-01-01T00:00:00Z
        let ms = 1_767_225_600_000;
        assert_eq!(rfc3339(ms), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn from_ms_rejects_out_of_range() {
        assert!(from_ms(i64::MAX).is_none());
    }
}
