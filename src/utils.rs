use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string such as "30", "30s", "10m", "5h" or "3d".
///
/// A bare number is taken as seconds. Supported units:
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let Some(unit_char) = s.chars().last() else {
        return Err("Duration string cannot be empty".to_string());
    };

    if unit_char.is_ascii_digit() {
        return u64::from_str(s)
            .map(Duration::from_secs)
            .map_err(|_| format!("Invalid numeric value in duration: '{}'", s));
    }

    let value_str = &s[0..s.len() - unit_char.len_utf8()];
    let value = u64::from_str(value_str)
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    match unit_char {
        's' => Ok(Duration::from_secs(value)),
        'm' => Ok(Duration::from_secs(value * 60)),
        'h' => Ok(Duration::from_secs(value * 60 * 60)),
        'd' => Ok(Duration::from_secs(value * 24 * 60 * 60)),
        _ => Err(format!(
            "Unknown duration unit: '{}'. Use 's', 'm', 'h', or 'd'.",
            unit_char
        )),
    }
}

/// Splits a `name:value` header. Exactly one `:` is accepted; surrounding
/// whitespace is trimmed from both parts.
pub fn parse_header(header: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = header.split(':').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Header '{}' must be of the form name:value",
            header
        ));
    }

    let name = parts[0].trim();
    if name.is_empty() {
        return Err(format!("Header '{}' has an empty name", header));
    }

    Ok((name.to_string(), parts[1].trim().to_string()))
}
