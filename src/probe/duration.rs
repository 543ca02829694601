//! Parsing of Go-style duration strings (`30s`, `5m`, `1h30m`, `1.5h`)
//! as accepted by the `cache` query parameter.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid number in duration: {0}")]
    InvalidNumber(String),

    #[error("missing unit in duration: {0}")]
    MissingUnit(String),

    #[error("unknown unit \"{0}\" in duration")]
    UnknownUnit(String),
}

/// Parse a sequence of `<number><unit>` pairs with no separators.
///
/// Units: `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_go_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(DurationParseError::InvalidNumber(s.to_string()));
        }
        let (number, tail) = rest.split_at(num_len);
        let value: f64 = number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(number.to_string()))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        if unit_len == 0 {
            return Err(DurationParseError::MissingUnit(s.to_string()));
        }
        let (unit, tail) = tail.split_at(unit_len);

        let secs = match unit {
            "ms" => value / 1_000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3_600.0,
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };
        total += secs;
        rest = tail;
    }

    Duration::try_from_secs_f64(total).map_err(|_| DurationParseError::InvalidNumber(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_compound_units() {
        assert_eq!(parse_go_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_go_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_go_duration("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_go_duration("1.5h").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_go_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_go_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_go_duration(""), Err(DurationParseError::Empty));
        assert!(matches!(
            parse_go_duration("10"),
            Err(DurationParseError::MissingUnit(_))
        ));
        assert!(matches!(
            parse_go_duration("5d"),
            Err(DurationParseError::UnknownUnit(u)) if u == "d"
        ));
        assert!(matches!(
            parse_go_duration("m5"),
            Err(DurationParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_go_duration("1..5s"),
            Err(DurationParseError::InvalidNumber(_))
        ));
    }
}
