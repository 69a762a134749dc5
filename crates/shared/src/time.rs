use chrono::{DateTime, TimeZone, Utc};

/// Seconds between the Unix epoch (1970-01-01) and the platform's reference
/// date (2001-01-01), both UTC.
const APPLE_EPOCH_OFFSET_SECONDS: i64 = 978_307_200;

/// Convert a source timestamp expressed as nanoseconds since 2001-01-01 UTC
/// into a UTC `DateTime`.
///
/// The source column is occasionally populated in seconds rather than
/// nanoseconds for very old rows; we only ever receive the nanosecond
/// encoding in practice, so no unit-sniffing is performed here — the
/// caller is expected to pass the raw column value untouched.
#[must_use]
pub fn apple_epoch_to_utc(apple_epoch_nanos: i64) -> DateTime<Utc> {
  let apple_epoch_seconds = apple_epoch_nanos.div_euclid(1_000_000_000);
  let remainder_nanos = apple_epoch_nanos.rem_euclid(1_000_000_000) as u32;
  let unix_seconds = apple_epoch_seconds + APPLE_EPOCH_OFFSET_SECONDS;
  Utc
    .timestamp_opt(unix_seconds, remainder_nanos)
    .single()
    .unwrap_or_else(|| Utc.timestamp_opt(unix_seconds, 0).unwrap())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn apple_epoch_zero_is_reference_date() {
    let dt = apple_epoch_to_utc(0);
    assert_eq!(dt.to_rfc3339(), "2001-01-01T00:00:00+00:00");
  }

  #[test]
  fn apple_epoch_one_second_after() {
    let dt = apple_epoch_to_utc(1_000_000_000);
    assert_eq!(dt.to_rfc3339(), "2001-01-01T00:00:01+00:00");
  }
}
