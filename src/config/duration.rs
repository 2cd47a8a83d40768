//! Duration string parsing.
//!
//! Configuration values such as `expire_events` and `movement_window` use
//! suffixed duration strings ("720h", "4h", "1h30m", "90s"). The grammar is
//! one or more `<integer><unit>` groups with units `h`, `m`, and `s`.

use std::time::Duration;

use anyhow::{bail, Result};

/// Parses a duration string into a [`Duration`].
///
/// Returns an error for an empty string, an unknown unit, or a group with
/// no digits.
pub fn parse(s: &str) -> Result<Duration> {
    if s.is_empty() {
        bail!("empty duration string");
    }
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut groups = 0;
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            bail!("malformed duration {:?}", s);
        }
        let value: u64 = digits.parse()?;
        let secs = match c {
            'h' => value * 3600,
            'm' => value * 60,
            's' => value,
            _ => bail!("unknown duration unit {:?} in {:?}", c, s),
        };
        total += secs;
        digits.clear();
        groups += 1;
    }
    if !digits.is_empty() || groups == 0 {
        bail!("malformed duration {:?}", s);
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse("720h").unwrap(), Duration::from_secs(720 * 3600));
        assert_eq!(parse("4h").unwrap(), Duration::from_secs(4 * 3600));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse("2m30s").unwrap(), Duration::from_secs(150));
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse("90s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("h").is_err());
        assert!(parse("10").is_err());
        assert!(parse("10d").is_err());
        assert!(parse("ten hours").is_err());
    }
}
