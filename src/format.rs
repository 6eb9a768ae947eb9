//! Display helpers shared by the host screens: naira amounts and record timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const NAIRA: char = '₦';

/// Formats an amount as naira with thousands separators and at most two
/// decimals; whole amounts carry no fraction (`₦1,500`, `₦1,234.5`).
///
/// Amounts that are not finite format as `₦0.00`.
pub fn format_currency(amount: f64) -> String {
    if !amount.is_finite() {
        return format!("{NAIRA}0.00");
    }

    let kobo = (amount.abs() * 100.0).round() as u64;
    let (whole, fraction) = (kobo / 100, kobo % 100);
    let sign = if amount < 0.0 && kobo > 0 { "-" } else { "" };

    let mut text = format!("{sign}{NAIRA}{}", group_thousands(whole));
    if fraction > 0 {
        let decimals = format!("{fraction:02}");
        text.push('.');
        text.push_str(decimals.trim_end_matches('0'));
    }
    text
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// Formats a stored timestamp as `1 Mar 2026, 09:30 AM` (UTC).
///
/// Accepts RFC 3339 timestamps, `YYYY-MM-DDTHH:MM:SS[.fff]` and bare dates.
/// Empty input gives an empty string and anything else unparsable gives
/// `Invalid Date`.
pub fn format_date(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    match parse_timestamp(text) {
        Some(moment) => moment.format("%-d %b %Y, %I:%M %p").to_string(),
        None => "Invalid Date".to_string(),
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(moment) = DateTime::parse_from_rfc3339(text) {
        return Some(moment.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
