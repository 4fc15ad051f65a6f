//! Go-style duration strings: `"300ms"`, `"2s"`, `"1m30s"`, `"1.5h"`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
  #[error("empty duration")]
  Empty,

  #[error("negative duration: {0:?}")]
  Negative(String),

  #[error("missing unit in duration {0:?}")]
  MissingUnit(String),

  #[error("unknown unit {unit:?} in duration {input:?}")]
  UnknownUnit { input: String, unit: String },

  #[error("invalid duration {0:?}")]
  Invalid(String),
}

/// Parse a duration string made of one or more `<number><unit>` segments.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `"0"` is allowed.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
  let s = input.trim();
  if s.is_empty() {
    return Err(DurationError::Empty);
  }
  if s.starts_with('-') {
    return Err(DurationError::Negative(input.to_string()));
  }
  let s = s.strip_prefix('+').unwrap_or(s);
  if s == "0" {
    return Ok(Duration::ZERO);
  }

  let mut total_nanos: f64 = 0.0;
  let mut rest = s;

  while !rest.is_empty() {
    let number_len = rest
      .find(|c: char| !(c.is_ascii_digit() || c == '.'))
      .unwrap_or(rest.len());
    if number_len == 0 {
      return Err(DurationError::Invalid(input.to_string()));
    }
    let number: f64 = rest[..number_len]
      .parse()
      .map_err(|_| DurationError::Invalid(input.to_string()))?;
    rest = &rest[number_len..];

    let unit_len = rest
      .find(|c: char| c.is_ascii_digit() || c == '.')
      .unwrap_or(rest.len());
    if unit_len == 0 {
      return Err(DurationError::MissingUnit(input.to_string()));
    }
    let unit = &rest[..unit_len];
    rest = &rest[unit_len..];

    let scale = match unit {
      "ns" => 1.0,
      "us" | "µs" | "μs" => 1e3,
      "ms" => 1e6,
      "s" => 1e9,
      "m" => 60e9,
      "h" => 3600e9,
      _ => {
        return Err(DurationError::UnknownUnit {
          input: input.to_string(),
          unit: unit.to_string(),
        });
      }
    };
    total_nanos += number * scale;
  }

  if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
    return Err(DurationError::Invalid(input.to_string()));
  }

  Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Format a duration the way [`parse_duration`] reads it back.
pub fn format_duration(duration: Duration) -> String {
  let millis = duration.as_millis();
  if millis == 0 {
    return if duration.is_zero() {
      "0s".to_string()
    } else {
      format!("{}ns", duration.as_nanos())
    };
  }
  if millis % 1000 != 0 {
    return format!("{}ms", millis);
  }

  let secs = duration.as_secs();
  let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
  let mut out = String::new();
  if h > 0 {
    out.push_str(&format!("{}h", h));
  }
  if m > 0 {
    out.push_str(&format!("{}m", m));
  }
  if s > 0 || out.is_empty() {
    out.push_str(&format!("{}s", s));
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_simple_units() {
    assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
    assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
    assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
  }

  #[test]
  fn test_parse_compound_and_fractional() {
    assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
    assert_eq!(
      parse_duration("1h2m3s").unwrap(),
      Duration::from_secs(3723)
    );
  }

  #[test]
  fn test_parse_errors() {
    assert_eq!(parse_duration(""), Err(DurationError::Empty));
    assert!(matches!(
      parse_duration("-1s"),
      Err(DurationError::Negative(_))
    ));
    assert!(matches!(
      parse_duration("10"),
      Err(DurationError::MissingUnit(_))
    ));
    assert!(matches!(
      parse_duration("3d"),
      Err(DurationError::UnknownUnit { .. })
    ));
    assert!(matches!(parse_duration("s"), Err(DurationError::Invalid(_))));
  }

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
    assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    assert_eq!(format_duration(Duration::ZERO), "0s");
    assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
  }
}
