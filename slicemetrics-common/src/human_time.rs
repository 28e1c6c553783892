//! Human-readable print time parsing and formatting
//!
//! Slicers report estimated print time in several shapes:
//!
//! - `1d 2h 3m 4s` (PrusaSlicer)
//! - `01h23m45s` (compact, zero padded)
//! - `1:23:45` or `23:45`
//! - `5025` (plain seconds)
//!
//! All of them go through [`parse_print_duration`].

const SECONDS_PER_MINUTE: f64 = 60.0;
const SECONDS_PER_HOUR: f64 = 3600.0;
const SECONDS_PER_DAY: f64 = 86400.0;

/// Parse a number that may use `,` as the decimal separator
///
/// - `1234.5` and `1234,5` both parse as 1234.5
/// - `1,234.5` treats `,` as a thousands separator
/// - `1,234,567` (several commas, no dot) is a thousands-grouped integer
///
/// Returns `None` for anything else, including NaN and infinities.
///
/// # Examples
///
/// ```
/// use slicemetrics_common::human_time::parse_locale_number;
///
/// assert_eq!(parse_locale_number("1234,5"), Some(1234.5));
/// assert_eq!(parse_locale_number("1,234.5"), Some(1234.5));
/// assert_eq!(parse_locale_number("abc"), None);
/// ```
pub fn parse_locale_number(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    let commas = token.matches(',').count();
    let has_dot = token.contains('.');

    let normalized = match (commas, has_dot) {
        (0, _) => token.to_string(),
        (1, false) => token.replace(',', "."),
        (_, _) => token.replace(',', ""),
    };

    // Reject things like "1e5x" or "inf" that f64::from_str would accept partially
    if !normalized
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a print time estimate into whole seconds
///
/// # Examples
///
/// ```
/// use slicemetrics_common::human_time::parse_print_duration;
///
/// assert_eq!(parse_print_duration("01h23m45s"), Some(5025));
/// assert_eq!(parse_print_duration("1h 23m 45s"), Some(5025));
/// assert_eq!(parse_print_duration("1:23:45"), Some(5025));
/// assert_eq!(parse_print_duration("5025"), Some(5025));
/// assert_eq!(parse_print_duration("1d 0h 0m 1s"), Some(86401));
/// assert_eq!(parse_print_duration("soon"), None);
/// ```
pub fn parse_print_duration(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let seconds = if text.contains(':') {
        parse_clock(text)?
    } else if let Some(plain) = parse_locale_number(text) {
        plain
    } else {
        parse_units(text)?
    };

    if seconds < 0.0 {
        return None;
    }
    Some(seconds.round() as u64)
}

/// `H:MM:SS` or `M:SS`
fn parse_clock(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    let nums: Option<Vec<f64>> = parts.iter().map(|p| parse_locale_number(p)).collect();
    let nums = nums?;

    match nums.as_slice() {
        [m, s] => Some(m * SECONDS_PER_MINUTE + s),
        [h, m, s] => Some(h * SECONDS_PER_HOUR + m * SECONDS_PER_MINUTE + s),
        _ => None,
    }
}

/// Sequence of `<number><unit>` pairs with units d/h/m/s, whitespace ignored
fn parse_units(text: &str) -> Option<f64> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    let mut total = 0.0;
    let mut number = String::new();
    let mut seen_unit = false;

    for c in compact.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(c);
            continue;
        }

        let factor = match c.to_ascii_lowercase() {
            'd' => SECONDS_PER_DAY,
            'h' => SECONDS_PER_HOUR,
            'm' => SECONDS_PER_MINUTE,
            's' => 1.0,
            _ => return None,
        };

        if number.is_empty() {
            return None;
        }
        total += parse_locale_number(&number)? * factor;
        number.clear();
        seen_unit = true;
    }

    // Trailing number without a unit is not a duration we understand
    if !number.is_empty() || !seen_unit {
        return None;
    }

    Some(total)
}

/// Format whole seconds the way PrusaSlicer prints estimates
///
/// # Examples
///
/// ```
/// use slicemetrics_common::human_time::format_print_time;
///
/// assert_eq!(format_print_time(45), "45s");
/// assert_eq!(format_print_time(5025), "1h 23m 45s");
/// assert_eq!(format_print_time(90061), "1d 1h 1m 1s");
/// ```
pub fn format_print_time(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
