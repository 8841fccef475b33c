//! Field checks reused by the handlers' guard clauses.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::error::ApiError;
use crate::messages;

/// Trimmed, non-empty text of at most `max` characters.
pub fn required_text<'a>(value: &'a str, field: &str, max: usize) -> Result<&'a str, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    if v.chars().count() > max {
        return Err(ApiError::validation(format!("{field} is too long (max {max})")));
    }
    Ok(v)
}

/// Like `required_text` but absent or blank means `None`.
pub fn optional_text<'a>(value: Option<&'a str>, field: &str, max: usize) -> Result<Option<&'a str>, ApiError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(v) => required_text(v, field, max).map(Some),
    }
}

pub fn positive_i32(value: i32, field: &str) -> Result<i32, ApiError> {
    if value <= 0 {
        return Err(ApiError::validation(format!("{field}: {}", messages::INVALID_NUMBER)));
    }
    Ok(value)
}

pub fn positive_amount(value: i64, field: &str) -> Result<i64, ApiError> {
    if value <= 0 {
        return Err(ApiError::validation(format!("{field}: {}", messages::INVALID_NUMBER)));
    }
    Ok(value)
}

pub fn non_negative_amount(value: i64, field: &str) -> Result<i64, ApiError> {
    if value < 0 {
        return Err(ApiError::validation(format!("{field} cannot be negative")));
    }
    Ok(value)
}

pub fn not_in_past(at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ApiError> {
    if at < now {
        return Err(ApiError::validation(messages::DATE_IN_PAST));
    }
    Ok(())
}

pub fn date_not_in_past(day: NaiveDate, today: NaiveDate) -> Result<(), ApiError> {
    if day < today {
        return Err(ApiError::validation(messages::DATE_IN_PAST));
    }
    Ok(())
}

pub fn date_not_in_future(day: NaiveDate, today: NaiveDate) -> Result<(), ApiError> {
    if day > today {
        return Err(ApiError::validation(messages::DATE_IN_FUTURE));
    }
    Ok(())
}

pub fn ordered(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ApiError> {
    if end <= start {
        return Err(ApiError::validation(messages::END_BEFORE_START));
    }
    Ok(())
}

/// Accepts an optional leading `+`, then 9..=15 digits; spaces and dashes are ignored.
/// Returns the normalized form.
pub fn phone_number(value: &str) -> Result<String, ApiError> {
    let v = value.trim();
    let (plus, rest) = match v.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", v),
    };
    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' => {}
            _ => return Err(ApiError::validation("phone number contains invalid characters")),
        }
    }
    if !(9..=15).contains(&digits.len()) {
        return Err(ApiError::validation("phone number must have 9 to 15 digits"));
    }
    Ok(format!("{plus}{digits}"))
}

pub fn email(value: &str) -> Result<&str, ApiError> {
    let v = value.trim();
    let valid = match v.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || v.len() > 254 || v.contains(char::is_whitespace) {
        return Err(ApiError::validation("email is invalid"));
    }
    Ok(v)
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 200)
}

pub fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}

/// A status update guarded on the status it was checked against matched no row, so another
/// request moved the entity first.
pub fn transition_applied(rows_affected: u64) -> Result<(), ApiError> {
    if rows_affected == 0 {
        return Err(ApiError::validation(messages::INVALID_STATUS_TRANSITION));
    }
    Ok(())
}

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 9999;

pub fn parse_day(value: &str, field: &str) -> Result<NaiveDate, ApiError> {
    let day = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{field} must be YYYY-MM-DD")))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&day.year()) {
        return Err(ApiError::validation(format!("{field} must be between {MIN_YEAR} and {MAX_YEAR}")));
    }
    Ok(day)
}

/// `day` moved by `days` (negative goes back); out-of-calendar results are a validation error.
pub fn shift_day(day: NaiveDate, days: i64, field: &str) -> Result<NaiveDate, ApiError> {
    Duration::try_days(days)
        .and_then(|d| day.checked_add_signed(d))
        .ok_or_else(|| ApiError::validation(format!("{field} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_bounds() {
        assert_eq!(required_text("  Scaling ", "name", 10).unwrap(), "Scaling");
        assert!(required_text("   ", "name", 10).is_err());
        assert!(required_text("abcdefghijk", "name", 10).is_err());
    }

    #[test]
    fn optional_text_blank_is_none() {
        assert_eq!(optional_text(Some("  "), "note", 5).unwrap(), None);
        assert_eq!(optional_text(None, "note", 5).unwrap(), None);
        assert_eq!(optional_text(Some(" ok "), "note", 5).unwrap(), Some("ok"));
    }

    #[test]
    fn numeric_checks() {
        assert!(positive_i32(0, "quantity").is_err());
        assert!(positive_i32(-3, "quantity").is_err());
        assert_eq!(positive_i32(2, "quantity").unwrap(), 2);
        assert!(positive_amount(0, "amount").is_err());
        assert!(non_negative_amount(-1, "price").is_err());
        assert_eq!(non_negative_amount(0, "price").unwrap(), 0);
    }

    #[test]
    fn time_checks() {
        let now = Utc::now();
        assert!(not_in_past(now - Duration::minutes(1), now).is_err());
        assert!(not_in_past(now, now).is_ok());
        assert!(ordered(now, now).is_err());
        assert!(ordered(now, now + Duration::minutes(30)).is_ok());

        let today = now.date_naive();
        assert!(date_not_in_past(today - Duration::days(1), today).is_err());
        assert!(date_not_in_future(today + Duration::days(1), today).is_err());
        assert!(date_not_in_future(today, today).is_ok());
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(phone_number("+84 912-345-678").unwrap(), "+84912345678");
        assert_eq!(phone_number("0912345678").unwrap(), "0912345678");
        assert!(phone_number("12345").is_err());
        assert!(phone_number("09123x5678").is_err());
    }

    #[test]
    fn email_shape() {
        assert!(email("a@clinic.vn").is_ok());
        assert!(email("no-at-sign").is_err());
        assert!(email("@clinic.vn").is_err());
        assert!(email("a@localhost").is_err());
        assert!(email("a b@clinic.vn").is_err());
    }

    #[test]
    fn paging_is_clamped() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), 200);
        assert_eq!(clamp_offset(Some(-5)), 0);
    }

    #[test]
    fn day_parsing() {
        assert!(parse_day("2026-02-30", "start").is_err());
        assert_eq!(
            parse_day(" 2026-03-01 ", "start").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
        );
    }

    #[test]
    fn extended_years_are_rejected() {
        assert!(parse_day("+262142-12-31", "start").is_err());
        assert!(parse_day("-0001-01-01", "start").is_err());
        assert!(parse_day("1899-12-31", "start").is_err());
        assert!(parse_day("9999-12-31", "start").is_ok());
    }

    #[test]
    fn shifting_days_stays_in_the_calendar() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(shift_day(day, 31, "start").unwrap(), NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert_eq!(shift_day(day, -1, "to").unwrap(), NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
        assert!(shift_day(NaiveDate::MAX, 7, "start").is_err());
        assert!(shift_day(day, i64::MAX, "start").is_err());
    }

    #[test]
    fn lost_status_race_is_a_bad_transition() {
        let err = transition_applied(0).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m == messages::INVALID_STATUS_TRANSITION));
        assert!(transition_applied(1).is_ok());
    }
}
