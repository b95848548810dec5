//! Point-in-time helpers shared by normalization, the query engine and the writers.
//!
//! The remote service mixes unix seconds, unix milliseconds, digit strings, RFC 3339
//! timestamps and bare calendar dates. Everything funnels through [`to_millis`].

use crate::error::AppError;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Numbers below this magnitude are unix seconds, anything above is milliseconds.
pub const MILLIS_THRESHOLD: f64 = 1e12;

const MIN_INPUT_YEAR: i32 = 1900;
const MAX_INPUT_YEAR: i32 = 2100;

pub fn to_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_f64().and_then(millis_from_number),
        Value::String(raw) => str_to_millis(raw),
        _ => None,
    }
}

pub fn str_to_millis(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        return trimmed.parse::<f64>().ok().and_then(millis_from_number);
    }
    parse_timestamp(trimmed).map(|instant| (instant.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn millis_from_number(number: f64) -> Option<i64> {
    if !number.is_finite() {
        return None;
    }
    let millis = if number < MILLIS_THRESHOLD {
        number * 1000.0
    } else {
        number
    };
    Some(millis as i64)
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(parsed);
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(parsed) = PrimitiveDateTime::parse(raw, naive) {
        return Some(parsed.assume_utc());
    }
    parse_iso_date(raw).map(|date| date.midnight().assume_utc())
}

pub fn parse_instant(value: &Value) -> Option<OffsetDateTime> {
    to_millis(value).and_then(from_millis)
}

pub fn from_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

pub fn instant_millis(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn parse_iso_date(raw: &str) -> Option<Date> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw.trim(), format).ok()
}

pub fn iso_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn format_dmy(date: Date) -> String {
    format!(
        "{:02}-{:02}-{:04}",
        date.day(),
        u8::from(date.month()),
        date.year()
    )
}

/// Parse what a user types into a date field: `DD-MM-YYYY`, `DDMMYYYY` or `YYYY-MM-DD`.
/// Blank input means "no date".
pub fn parse_date_input(raw: &str) -> Result<Option<Date>, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let parts = if trimmed.len() == 8 && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        Some((&trimmed[0..2], &trimmed[2..4], &trimmed[4..8]))
    } else {
        let pieces: Vec<&str> = trimmed.split('-').collect();
        match pieces.as_slice() {
            [day, month, year] if day.len() == 2 && month.len() == 2 && year.len() == 4 => {
                Some((*day, *month, *year))
            }
            [year, month, day] if year.len() == 4 && month.len() == 2 && day.len() == 2 => {
                Some((*day, *month, *year))
            }
            _ => None,
        }
    };

    let (day, month, year) =
        parts.ok_or_else(|| AppError::invalid_input("date must be DD-MM-YYYY"))?;
    date_from_parts(day, month, year)
        .map(Some)
        .ok_or_else(|| AppError::invalid_input(format!("invalid date: {trimmed}")))
}

fn date_from_parts(day: &str, month: &str, year: &str) -> Option<Date> {
    let day: u8 = day.parse().ok()?;
    let month: u8 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;
    if !(MIN_INPUT_YEAR..=MAX_INPUT_YEAR).contains(&year) {
        return None;
    }
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

pub fn start_of_day(date: Date, offset: UtcOffset) -> OffsetDateTime {
    date.midnight().assume_offset(offset)
}

pub fn end_of_day(date: Date, offset: UtcOffset) -> OffsetDateTime {
    date.with_time(Time::MAX).assume_offset(offset)
}

/// The calendar day a stored instant falls on, in the viewer's offset.
pub fn local_date(value: &Value, offset: UtcOffset) -> Option<Date> {
    parse_instant(value).map(|instant| instant.to_offset(offset).date())
}

pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::{
        end_of_day, format_dmy, iso_date, parse_date_input, parse_instant, str_to_millis,
        to_millis,
    };
    use serde_json::json;
    use time::{Date, Month, UtcOffset};

    #[test]
    fn numbers_below_threshold_are_seconds() {
        assert_eq!(to_millis(&json!(1_700_000_000)), Some(1_700_000_000_000));
        assert_eq!(to_millis(&json!(1_700_000_000_000_i64)), Some(1_700_000_000_000));
        assert_eq!(to_millis(&json!("1700000000")), Some(1_700_000_000_000));
    }

    #[test]
    fn strings_parse_as_timestamps_or_dates() {
        assert_eq!(
            str_to_millis("2024-01-01T00:00:00.000Z"),
            Some(1_704_067_200_000)
        );
        assert_eq!(str_to_millis("2024-01-01"), Some(1_704_067_200_000));
        assert_eq!(str_to_millis("not a date"), None);
        assert_eq!(to_millis(&json!(null)), None);
        assert_eq!(to_millis(&json!(true)), None);
    }

    #[test]
    fn parse_instant_rejects_blank_strings() {
        assert!(parse_instant(&json!("  ")).is_none());
    }

    #[test]
    fn date_input_accepts_supported_layouts() {
        let expected = Date::from_calendar_date(2025, Month::March, 7).unwrap();
        assert_eq!(parse_date_input("07-03-2025").unwrap(), Some(expected));
        assert_eq!(parse_date_input("07032025").unwrap(), Some(expected));
        assert_eq!(parse_date_input("2025-03-07").unwrap(), Some(expected));
        assert_eq!(parse_date_input("   ").unwrap(), None);
    }

    #[test]
    fn date_input_rejects_impossible_dates() {
        assert_eq!(
            parse_date_input("31-02-2025").unwrap_err().code(),
            "invalid_input"
        );
        assert!(parse_date_input("01-01-1850").is_err());
        assert!(parse_date_input("1-1-2025").is_err());
        assert!(parse_date_input("tomorrow").is_err());
    }

    #[test]
    fn formats_dates() {
        let date = Date::from_calendar_date(2025, Month::March, 7).unwrap();
        assert_eq!(iso_date(date), "2025-03-07");
        assert_eq!(format_dmy(date), "07-03-2025");
    }

    #[test]
    fn end_of_day_is_last_instant_of_the_day() {
        let date = Date::from_calendar_date(2025, Month::March, 7).unwrap();
        let end = end_of_day(date, UtcOffset::UTC);
        assert_eq!(end.date(), date);
        assert_eq!((end + time::Duration::nanoseconds(1)).date(), date.next_day().unwrap());
    }
}
