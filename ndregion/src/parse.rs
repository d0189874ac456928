//! A parser for regions written in indexing notation.
//!
//! Each comma-separated axis is one of `n`, `a:b`, `:`, `a:`, `:b`,
//! optionally followed by a `:stride` suffix, where only a stride of
//! 1 is accepted. The whole expression may be wrapped in
//! `region[...]`, so that the canonical rendering of a region parses
//! back into the same region:
//!
//! ```
//! use ndregion::Region;
//!
//! let r: Region = "region[3:4, 4:, :5, 6:7]".parse().unwrap();
//! assert_eq!(r, "3, 4:, :5, 6:7".parse().unwrap());
//! assert_eq!(r.to_string(), "region[3:4, 4:, :5, 6:7]");
//! ```

use std::str::FromStr;

use crate::region::Range;
use crate::region::Region;
use crate::region::RegionError;

impl FromStr for Region {
    type Err = RegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parse a region expression. See the [module documentation](self)
/// for the accepted syntax.
pub fn parse(expr: &str) -> Result<Region, RegionError> {
    let body = strip_wrapper(expr.trim())?;
    if body.trim().is_empty() {
        return Err(RegionError::NoDimensions);
    }

    let ranges = body
        .split(',')
        .map(|axis| parse_axis(expr, axis))
        .collect::<Result<Vec<_>, _>>()?;
    Region::new(ranges)
}

fn strip_wrapper(expr: &str) -> Result<&str, RegionError> {
    let Some(rest) = expr.strip_prefix("region") else {
        return Ok(expr);
    };
    rest.trim_start()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| RegionError::InvalidExpression {
            expr: expr.to_string(),
            reason: "unbalanced brackets".to_string(),
        })
}

fn parse_axis(expr: &str, axis: &str) -> Result<Range, RegionError> {
    let parts: Vec<&str> = axis.split(':').map(str::trim).collect();
    match parts.as_slice() {
        [index] => {
            let Some(index) = parse_bound(expr, index)? else {
                return Err(RegionError::InvalidExpression {
                    expr: expr.to_string(),
                    reason: "empty axis".to_string(),
                });
            };
            if index < 0 {
                return Err(RegionError::NegativeBound { value: index });
            }
            Ok(Range::from(index as usize))
        }
        [start, stop] => Range::from_signed(parse_bound(expr, start)?, parse_bound(expr, stop)?, None),
        [start, stop, stride] => Range::from_signed(
            parse_bound(expr, start)?,
            parse_bound(expr, stop)?,
            parse_bound(expr, stride)?,
        ),
        _ => Err(RegionError::InvalidExpression {
            expr: expr.to_string(),
            reason: format!("too many `:` in axis `{}`", axis.trim()),
        }),
    }
}

fn parse_bound(expr: &str, token: &str) -> Result<Option<i64>, RegionError> {
    if token.is_empty() {
        return Ok(None);
    }
    match token.parse::<i64>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            let digits = token.strip_prefix('-').unwrap_or(token);
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                Err(RegionError::Overflow {
                    token: token.to_string(),
                })
            } else {
                Err(RegionError::InvalidExpression {
                    expr: expr.to_string(),
                    reason: format!("`{}` is not an integer", token),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region;

    fn p(expr: &str) -> Region {
        expr.parse().unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(p("2"), region![2].unwrap());
        assert_eq!(p("2:4"), region![2..4].unwrap());
        assert_eq!(p("2:4, 3:7, 9:10"), region![2..4, 3..7, 9..10].unwrap());
        assert_eq!(p(":, :, :"), region![.., .., ..].unwrap());
        assert_eq!(p(":2, 1:, :"), region![..2, 1.., ..].unwrap());
        assert_eq!(p(":"), region![..].unwrap());
        assert_eq!(p(":, 3, 1:9:1, 7"), region![.., 3, 1..9, 7].unwrap());
        assert_eq!(p("region[ 1:2 ,3 ]"), region![1..2, 3].unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse("-1").unwrap_err(),
            RegionError::NegativeBound { value: -1 }
        );
        assert!(parse(":, -1:-2").unwrap_err().is_overflow());
        assert!(parse("99999999999999999999").unwrap_err().is_overflow());
        assert_eq!(
            parse("::3").unwrap_err(),
            RegionError::UnsupportedStride { stride: 3 }
        );
        assert!(matches!(
            parse("5:4").unwrap_err(),
            RegionError::EmptyRange { .. }
        ));
        assert!(matches!(
            parse("5:5").unwrap_err(),
            RegionError::EmptyRange { .. }
        ));
        assert_eq!(parse("").unwrap_err(), RegionError::NoDimensions);
        assert_eq!(parse("region[]").unwrap_err(), RegionError::NoDimensions);
        assert!(matches!(
            parse("1,,2").unwrap_err(),
            RegionError::InvalidExpression { .. }
        ));
        assert!(matches!(
            parse("a:b").unwrap_err(),
            RegionError::InvalidExpression { .. }
        ));
        assert!(matches!(
            parse("1:2:1:1").unwrap_err(),
            RegionError::InvalidExpression { .. }
        ));
        assert!(matches!(
            parse("region[1:2").unwrap_err(),
            RegionError::InvalidExpression { .. }
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        for expr in ["3, 4:, :5, 6:7", ":", "0:1, 2:", "7:9"] {
            let r = p(expr);
            assert_eq!(p(&r.to_string()), r);
        }
    }

    #[test]
    fn test_interval_roundtrip() {
        for a in 0..12usize {
            for b in (a + 1)..14 {
                let r = p(&format!("{}:{}", a, b));
                for shape in [&[14][..], &[20], &[b]] {
                    assert_eq!(r.resolve(shape).unwrap().intervals().unwrap(), vec![(a, b)]);
                }
                assert!(r.resolve(&[b, 3]).unwrap().is_absolute());
            }
        }
        for a in 0..6i64 {
            for b in 0..=a {
                assert!(matches!(
                    parse(&format!("{}:{}", a, b)),
                    Err(RegionError::EmptyRange { .. })
                ));
                assert!(parse(&format!("{}:{}", -a - 1, b)).unwrap_err().is_overflow());
            }
        }
    }
}
