//! Date values accepted by `added:`, `firstplay:` and `lastplay:` filters.
//!
//! ## Supported Syntax
//!
//! - Keywords: `today`, `last week`, `last month`, `two months ago`,
//!   `three months ago`
//! - Offsets: `3m`, `2w`, `10d` and combinations in that order (`1m2w3d`),
//!   meaning that long ago. Parsing stops at the first part that does not fit.
//! - Absolute dates: `YYYY-MM-DD`, `DD.MM.YYYY`

use chrono::{DateTime, Duration, Local, Months, NaiveDate, TimeZone};

/// A resolved date as a unix timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDate {
    pub timestamp: i64,
    /// Calendar date rather than an offset from now.
    pub absolute: bool,
}

const ABSOLUTE_DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d.%m.%Y"];

pub fn parse_filter_date(text: &str, now: DateTime<Local>) -> Option<FilterDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    if let Some(date) = parse_keyword(&lower, now) {
        return Some(relative(date));
    }
    if let Some(timestamp) = parse_absolute(trimmed) {
        return Some(FilterDate {
            timestamp,
            absolute: true,
        });
    }
    parse_offset(&lower, now).map(relative)
}

fn relative(date: DateTime<Local>) -> FilterDate {
    FilterDate {
        timestamp: date.timestamp(),
        absolute: false,
    }
}

fn parse_keyword(lower: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    match lower {
        "today" => Some(now - Duration::days(1)),
        "last week" => Some(now - Duration::days(7)),
        "last month" => now.checked_sub_months(Months::new(1)),
        "two months ago" => now.checked_sub_months(Months::new(2)),
        "three months ago" => now.checked_sub_months(Months::new(3)),
        _ => None,
    }
}

fn parse_absolute(text: &str) -> Option<i64> {
    let date = ABSOLUTE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|local| local.timestamp())
}

/// Parses `(-?\d+m)?(-?\d+w)?(-?\d+d)?` left to right. The sign is accepted
/// but ignored; every part means "that long ago".
fn parse_offset(lower: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let mut rest = lower;
    let mut months = 0u32;
    let mut days = 0i64;
    let mut parsed_any = false;

    for unit in ['m', 'w', 'd'] {
        let Some((amount, remainder)) = take_part(rest, unit) else {
            continue;
        };
        match unit {
            'm' => months = months.saturating_add(u32::try_from(amount).unwrap_or(u32::MAX)),
            'w' => days = days.saturating_add(amount.saturating_mul(7)),
            _ => days = days.saturating_add(amount),
        }
        parsed_any = true;
        rest = remainder;
    }

    if !parsed_any {
        return None;
    }
    let shifted = now.checked_sub_months(Months::new(months))?;
    shifted.checked_sub_signed(Duration::try_days(days)?)
}

fn take_part(input: &str, unit: char) -> Option<(i64, &str)> {
    let unsigned = input.strip_prefix('-').unwrap_or(input);
    let digits_len = unsigned
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(unsigned.len());
    if digits_len == 0 {
        return None;
    }
    let remainder = unsigned[digits_len..].strip_prefix(unit)?;
    let amount = unsigned[..digits_len].parse::<i64>().ok()?;
    Some((amount, remainder))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 6, 15, 12, 0, 0)
            .single()
            .expect("fixed test time should be unambiguous")
    }

    fn days_ago(days: i64) -> i64 {
        (fixed_now() - Duration::days(days)).timestamp()
    }

    #[test]
    fn test_keywords() {
        let now = fixed_now();
        assert_eq!(
            parse_filter_date("today", now),
            Some(FilterDate {
                timestamp: days_ago(1),
                absolute: false
            })
        );
        assert_eq!(
            parse_filter_date("Last Week", now).map(|date| date.timestamp),
            Some(days_ago(7))
        );
        let two_months = Local
            .with_ymd_and_hms(2024, 4, 15, 12, 0, 0)
            .single()
            .expect("valid date");
        assert_eq!(
            parse_filter_date("two months ago", now).map(|date| date.timestamp),
            Some(two_months.timestamp())
        );
    }

    #[test]
    fn test_compact_offsets_accumulate() {
        let now = fixed_now();
        assert_eq!(
            parse_filter_date("2w3d", now).map(|date| date.timestamp),
            Some(days_ago(17))
        );
        let one_month_ten_days = Local
            .with_ymd_and_hms(2024, 5, 5, 12, 0, 0)
            .single()
            .expect("valid date");
        assert_eq!(
            parse_filter_date("1m10d", now).map(|date| date.timestamp),
            Some(one_month_ten_days.timestamp())
        );
    }

    #[test]
    fn test_offset_stops_at_malformed_part() {
        let now = fixed_now();
        assert_eq!(
            parse_filter_date("3dxyz", now).map(|date| date.timestamp),
            Some(days_ago(3))
        );
        // Units out of order end parsing after the first part.
        assert_eq!(
            parse_filter_date("3d2w", now).map(|date| date.timestamp),
            Some(days_ago(3))
        );
        assert_eq!(
            parse_filter_date("-5d", now).map(|date| date.timestamp),
            Some(days_ago(5))
        );
        assert_eq!(parse_filter_date("soon", now), None);
        assert_eq!(parse_filter_date("", now), None);
    }

    #[test]
    fn test_absolute_dates() {
        let now = fixed_now();
        let expected = Local
            .with_ymd_and_hms(2023, 12, 24, 0, 0, 0)
            .single()
            .expect("valid date")
            .timestamp();
        let parsed = parse_filter_date("2023-12-24", now).expect("date should parse");
        assert!(parsed.absolute);
        assert_eq!(parsed.timestamp, expected);
        assert_eq!(
            parse_filter_date("24.12.2023", now).map(|date| date.timestamp),
            Some(expected)
        );
    }
}
