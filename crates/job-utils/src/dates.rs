//! ISO-8601 to epoch conversion.
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{Iso8601FractionSnafu, Iso8601Snafu, Result};

/// Converts an ISO-8601 timestamp with an offset to epoch seconds.
///
/// Accepts a space in place of the `T` separator, optional fractional
/// seconds (at most 6 digits) and `Z` for UTC. Fractions are rounded to
/// the nearest second, ties to even.
pub fn convert_iso8601_to_epoch(iso_time: &str) -> Result<i64> {
    let mut normalised = iso_time.trim().replace(' ', "T");
    if let Some(utc) = normalised.strip_suffix('Z') {
        normalised = format!("{utc}+00:00");
    }
    let format = match normalised.split_once('.') {
        Some((_, fraction)) => {
            let digits = fraction.chars().take_while(char::is_ascii_digit).count();
            ensure!(digits <= 6, Iso8601FractionSnafu { value: iso_time });
            "%Y-%m-%dT%H:%M:%S%.f%z"
        }
        None => "%Y-%m-%dT%H:%M:%S%z",
    };
    let parsed = DateTime::parse_from_str(&normalised, format).context(Iso8601Snafu {
        value: iso_time,
    })?;
    let seconds =
        parsed.timestamp() as f64 + f64::from(parsed.timestamp_subsec_nanos()) / 1_000_000_000.0;
    Ok(seconds.round_ties_even() as i64)
}

/// Walks a JSON value, replacing every string that parses as an ISO-8601
/// timestamp with its epoch seconds.
pub fn normalise_dates(data: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match data {
        Value::String(s) => match convert_iso8601_to_epoch(&s) {
            Ok(epoch) => Value::from(epoch),
            Err(_) => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalise_dates).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalise_dates(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Epoch seconds of now plus `delta`.
pub fn utc_timestamp(delta: chrono::Duration) -> i64 {
    let at = Utc::now() + delta;
    (at.timestamp_millis() as f64 / 1000.0).round_ties_even() as i64
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn converts_iso8601() {
        assert_eq!(
            1546300800,
            convert_iso8601_to_epoch("2019-01-01T00:00:00.000Z").unwrap()
        );
        assert_eq!(
            1546300800,
            convert_iso8601_to_epoch("2019-01-01T00:00:00Z").unwrap()
        );
        assert_eq!(
            1546300800,
            convert_iso8601_to_epoch(" 2019-01-01 00:00:00+00:00 ").unwrap()
        );
        assert_eq!(
            1546300800,
            convert_iso8601_to_epoch("2019-01-01T01:00:00+0100").unwrap()
        );
        assert_eq!(
            1546300801,
            convert_iso8601_to_epoch("2019-01-01T00:00:00.600000Z").unwrap()
        );
    }

    #[test]
    fn rejects_non_dates() {
        assert!(convert_iso8601_to_epoch("not a date").is_err());
        assert!(convert_iso8601_to_epoch("2019-01-01").is_err());
        // no offset
        assert!(convert_iso8601_to_epoch("2019-01-01T00:00:00").is_err());
    }

    #[test]
    fn rejects_sub_microsecond_fractions() {
        let err = convert_iso8601_to_epoch("2019-01-01T00:00:00.1234567Z").unwrap_err();
        assert!(matches!(err, crate::Error::Iso8601Fraction { .. }), "{err:?}");
        assert_eq!(
            1546300800,
            convert_iso8601_to_epoch("2019-01-01T00:00:00.123456Z").unwrap()
        );
        assert_eq!(
            json!("2019-01-01T00:00:00.1234567Z"),
            normalise_dates(json!("2019-01-01T00:00:00.1234567Z"))
        );
    }

    #[test]
    fn normalises_nested_dates_only() {
        let data = json!({
            "Object": {
                "Key": "test",
                "CreatedAt": "2019-01-01T00:00:00.000Z",
            },
            "List": ["2019-01-01T00:00:00Z", "s3://bucket/key", 4, null],
            "Flag": true,
        });
        assert_eq!(
            json!({
                "Object": {
                    "Key": "test",
                    "CreatedAt": 1546300800,
                },
                "List": [1546300800, "s3://bucket/key", 4, null],
                "Flag": true,
            }),
            normalise_dates(data)
        );
    }

    #[test]
    fn timestamp_applies_delta() {
        let now = utc_timestamp(chrono::Duration::zero());
        let tomorrow = utc_timestamp(chrono::Duration::days(1));
        assert!((tomorrow - now - 86400).abs() <= 1);
    }
}
