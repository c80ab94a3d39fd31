//! Environment variable helpers.
//!
//! Empty values are treated as unset so that `FOO=` in a `.env` file does not
//! override a default with an empty string.

use std::str::FromStr;

use super::ConfigError;

pub(super) fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(super) fn parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid(name, format!("{raw:?}: {e}")))
        })
        .transpose()
}

pub(super) fn flag(name: &str) -> Result<Option<bool>, ConfigError> {
    var(name)
        .map(|raw| parse_bool(&raw).ok_or_else(|| ConfigError::invalid(name, format!("{raw:?} is not a boolean"))))
        .transpose()
}

pub(super) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
