use std::collections::BTreeSet;

use crate::parser::ParameterMap;
use crate::policy::ExclusionPolicy;

const TITLE_KEY: &str = "title";
const LEGACY_TITLE_KEY: &str = "title1";
const DESCRIPTION_KEY: &str = "description";
const TITLE_PREFIX: &str = "The ";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeResult {
    pub sanitized: ParameterMap,
    /// Keys dropped by a deletion marker that were present on the page.
    pub removed_keys: BTreeSet<String>,
}

/// Post-merge clean-up: numeric formatting, title and description rules, and
/// removal of parameters the feed marks as absent.
pub fn sanitize(
    data: &ParameterMap,
    existing: &ParameterMap,
    policy: &ExclusionPolicy,
) -> SanitizeResult {
    let mut sanitized = ParameterMap::new();
    let mut removed_keys = BTreeSet::new();

    for (key, raw) in data {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        if policy.marks_deletion(key, value) {
            if existing.contains_key(key) {
                removed_keys.insert(key.clone());
            }
            continue;
        }

        let value = match key.as_str() {
            LEGACY_TITLE_KEY => continue,
            TITLE_KEY => with_title_prefix(&normalize_number(value)),
            DESCRIPTION_KEY => single_line(&normalize_number(value)),
            _ => normalize_number(value),
        };
        sanitized.insert(key.clone(), value);
    }

    SanitizeResult {
        sanitized,
        removed_keys,
    }
}

/// Format a numeric value with thousands separators.
///
/// Whole numbers get no decimals, anything else exactly two. Values that are
/// not plain numbers (units, links, markup) are returned unchanged.
pub fn normalize_number(value: &str) -> String {
    match parse_number(value) {
        Some(number) => format_number(number),
        None => value.to_string(),
    }
}

fn with_title_prefix(value: &str) -> String {
    let prefixed = value
        .get(..TITLE_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(TITLE_PREFIX));
    if prefixed {
        value.to_string()
    } else {
        format!("{TITLE_PREFIX}{value}")
    }
}

fn single_line(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Accepts an optional sign, an integer part that is either plain digits or
/// correctly grouped with commas, and an optional fraction.
fn parse_number(value: &str) -> Option<f64> {
    let (sign, unsigned) = match value.as_bytes().first() {
        Some(b'-') => ("-", &value[1..]),
        Some(b'+') => ("", &value[1..]),
        _ => ("", value),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };

    if integer.is_empty() && fraction.is_none() {
        return None;
    }
    if !is_integer_part(integer) {
        return None;
    }
    if let Some(fraction) = fraction
        && (fraction.is_empty() || !fraction.bytes().all(|byte| byte.is_ascii_digit()))
    {
        return None;
    }

    let mut digits = integer.replace(',', "");
    if digits.is_empty() {
        digits.push('0');
    }
    let normalized = match fraction {
        Some(fraction) => format!("{sign}{digits}.{fraction}"),
        None => format!("{sign}{digits}"),
    };
    normalized
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

fn is_integer_part(integer: &str) -> bool {
    if !integer.contains(',') {
        return integer.bytes().all(|byte| byte.is_ascii_digit());
    }
    let mut groups = integer.split(',');
    let leading_ok = groups
        .next()
        .is_some_and(|head| (1..=3).contains(&head.len()) && head.bytes().all(|b| b.is_ascii_digit()));
    leading_ok && groups.all(|group| group.len() == 3 && group.bytes().all(|b| b.is_ascii_digit()))
}

fn format_number(number: f64) -> String {
    let number = if number == 0.0 { 0.0 } else { number };
    if number.fract() == 0.0 {
        group_thousands(&format!("{number:.0}"))
    } else {
        // Round half away from zero before formatting.
        let rounded = (number * 100.0).round() / 100.0;
        group_thousands(&format!("{rounded:.2}"))
    }
}

fn group_thousands(rendered: &str) -> String {
    let (sign, unsigned) = match rendered.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", rendered),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}
