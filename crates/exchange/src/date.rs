//! RFC 7231 HTTP-date parsing and formatting for conditional-GET.
//!
//! The grammar accepted here is deliberately narrower than RFC 7231's full
//! `HTTP-date` production: only the exact IMF-fixdate form
//! `Day, DD Mon YYYY HH:MM:SS GMT` is recognized. A wrong weekday name is
//! ignored (the date/time is still accepted); a timezone other than `GMT`
//! is rejected outright.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Parses an `if-modified-since`/`if-unmodified-since`/`last-modified`
/// header value. Returns `None` for anything not matching
/// `Day, DD Mon YYYY HH:MM:SS GMT` — including a non-GMT timezone. An
/// incorrect (but well-formed) weekday name does not invalidate the date.
pub fn parse_http_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    let (_weekday, rest) = input.split_once(", ")?;
    let rest = rest.strip_suffix(" GMT")?;

    // DD Mon YYYY HH:MM:SS
    let mut parts = rest.split(' ');
    let day: u32 = parts.next()?.parse().ok()?;
    let month_name = parts.next()?;
    let year_str = parts.next()?;
    let time_str = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    if year_str.len() != 4 || !year_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year_str.parse().ok()?;

    let month = u32::try_from(MONTHS.iter().position(|m| *m == month_name)? + 1).ok()?;

    let mut time_parts = time_str.split(':');
    let hour: u32 = time_parts.next()?.parse().ok()?;
    let minute: u32 = time_parts.next()?.parse().ok()?;
    let second: u32 = time_parts.next()?.parse().ok()?;
    if time_parts.next().is_some() || hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(DateTime::from_naive_utc_and_offset(
        NaiveDateTime::new(date, time),
        Utc,
    ))
}

/// Formats a timestamp as an HTTP-date for `last-modified` and friends.
pub fn format_http_date(date: DateTime<Utc>) -> String {
    let weekday = match date.weekday() {
        chrono::Weekday::Mon => "Mon",
        chrono::Weekday::Tue => "Tue",
        chrono::Weekday::Wed => "Wed",
        chrono::Weekday::Thu => "Thu",
        chrono::Weekday::Fri => "Fri",
        chrono::Weekday::Sat => "Sat",
        chrono::Weekday::Sun => "Sun",
    };
    format!(
        "{weekday}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year(),
        date.hour(),
        date.minute(),
        date.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_exact_imf_fixdate_form() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parsed.year(), 1994);
        assert_eq!(parsed.month(), 11);
        assert_eq!(parsed.day(), 6);
    }

    #[test]
    fn wrong_weekday_is_ignored() {
        assert!(parse_http_date("Mon, 06 Nov 1994 08:49:37 GMT").is_some());
    }

    #[test]
    fn non_gmt_timezone_is_rejected() {
        assert!(parse_http_date("Sun, 06 Nov 1994 08:49:37 UTC").is_none());
        assert!(parse_http_date("Sun, 06 Nov 1994 00:49:37 -0800").is_none());
    }

    #[test]
    fn round_trips_through_format() {
        let original = "Sun, 06 Nov 1994 08:49:37 GMT";
        let parsed = parse_http_date(original).unwrap();
        assert_eq!(format_http_date(parsed), original);
    }
}
