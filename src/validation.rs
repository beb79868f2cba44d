//! Small validation helpers shared by the codecs, the URL parser and the settings.
use std::fmt::Display;
use std::ops::RangeInclusive;

use crate::error::{AppResult, DaqError};

/// Validates if a given u16 value is a valid port number.
/// By type, the port is already within the 0-65535 range.
/// This function checks that the port is not 0, which is reserved.
///
/// # Arguments
///
/// * `port` - The u16 value to validate.
///
/// # Returns
///
/// * `Ok(())` if the port is valid.
/// * `Err(&'static str)` if the port is invalid.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// `NaN` is never inside a range, so non-finite floats are rejected here too.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty.
///
/// # Arguments
///
/// * `value` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the string is not empty.
/// * `Err(&'static str)` if the string is empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates that a CSV delimiter is exactly one ASCII character.
pub fn is_valid_delimiter(value: &str) -> Result<u8, &'static str> {
    match value.as_bytes() {
        [b] if b.is_ascii() && *b != b'\n' && *b != b'\r' && *b != b'"' => Ok(*b),
        [_] => Err("Delimiter must be a printable ASCII character"),
        _ => Err("Delimiter must be a single character"),
    }
}

/// Range check that reports the offending acquisition field as
/// [`DaqError::InvalidParameter`].
pub fn check_range<T>(field: &'static str, value: T, range: RangeInclusive<T>) -> AppResult<T>
where
    T: PartialOrd + Display + Copy,
{
    is_in_range(value, range.clone()).map_err(|_| {
        DaqError::invalid(
            field,
            format!(
                "must be between {} and {}, got {}",
                range.start(),
                range.end(),
                value
            ),
        )
    })?;
    Ok(value)
}
