// src/schema/normalize.rs
//! Value cleaners for exported spool text.
//!
//! These fix formatting artefacts of the export; they do not cast. Every
//! function is total: unparseable input becomes `""`.

use chrono::NaiveDate;

/// The export prefixes some values with a stray `X` marker; drop it.
fn strip_marker(value: &str) -> String {
    value.to_uppercase().replace('X', "").trim().to_string()
}

/// `"  0042X "` → `"42"`.
pub fn format_integer(value: &str) -> String {
    if value.trim().is_empty() {
        return String::new();
    }
    strip_marker(value)
        .parse::<i128>()
        .map(|n| n.to_string())
        .unwrap_or_default()
}

/// Locale decimal (`1.234,5` or trailing-minus `12,30-`) → `1234,5` / `-12,3`.
pub fn format_float(value: &str) -> String {
    if value.trim().is_empty() {
        return String::new();
    }
    let digits = strip_marker(value).replace('.', "").replace(',', ".");
    let signed = if digits.contains('-') {
        format!("-{}", digits.replace('-', ""))
    } else {
        digits
    };
    match signed.parse::<f64>() {
        Ok(n) if n.is_finite() => format!("{:?}", n).replace('.', ","),
        _ => String::new(),
    }
}

pub fn format_currency(value: &str) -> String {
    format_float(value)
}

/// `dd.mm.yyyy` → `dd/mm/yyyy`, rejecting impossible dates.
pub fn format_date(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = value.split('.').map(str::trim).collect();
    let [day, month, year] = parts.as_slice() else {
        return String::new();
    };
    let valid = match (day.parse::<u32>(), month.parse::<u32>(), year.parse::<i32>()) {
        (Ok(d), Ok(m), Ok(y)) => NaiveDate::from_ymd_opt(y, m, d).is_some(),
        _ => false,
    };
    if valid {
        format!("{}/{}/{}", day, month, year)
    } else {
        String::new()
    }
}

pub fn format_string(value: &str) -> String {
    value.trim().to_string()
}
