//! Human readable durations for configuration files
//!
//! Durations are written as strings such as `"1s"`, `"500ms"` or `"1m30s"`.
//! A bare number means seconds. Use with `#[serde(with = "common::duration")]`,
//! or `common::duration::option` for `Option<Duration>` fields, where
//! `"off"` (or a zero duration) stands for `None`.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Serde adapter for `Option<Duration>`
pub mod option {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const OFF: &str = "off";

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_str(OFF),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.trim().eq_ignore_ascii_case(OFF) {
            return Ok(None);
        }
        let duration = parse_duration(&s).map_err(serde::de::Error::custom)?;
        Ok(Some(duration).filter(|d| !d.is_zero()))
    }
}

/// Parse a duration string like `"2s"`, `"500ms"`, `"1h30m"`
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("Empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek().filter(|c| c.is_ascii_digit()) {
            number.push(*c);
            chars.next();
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek().filter(|c| c.is_ascii_alphabetic()) {
            unit.push(*c);
            chars.next();
        }

        if number.is_empty() {
            return Err(format!("Invalid duration format: {}", s));
        }
        let value: u64 = number
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", number))?;

        total += match unit.as_str() {
            "h" => Duration::from_secs(value * 3600),
            "m" => Duration::from_secs(value * 60),
            "s" | "" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            other => return Err(format!("Invalid duration unit: {}", other)),
        };
    }

    Ok(total)
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let parts = [
        (secs / 3600, "h"),
        ((secs % 3600) / 60, "m"),
        (secs % 60, "s"),
        (u64::from(d.subsec_millis()), "ms"),
    ];

    let result: String = parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect();

    if result.is_empty() {
        "0s".to_string()
    } else {
        result
    }
}
