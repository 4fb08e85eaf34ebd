//! Numeric result formatting for `$[format](…)` regions.
//!
//! Format spec: `[0][width][.precision][i|f]`. `i` truncates the double
//! toward zero and drops the fractional part; `f` (or no suffix) keeps the
//! double with the given precision. A leading `0` pads with zeros, otherwise
//! width pads with spaces.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cast {
    /// No cast marker: the raw double, also eligible for
    /// `eval_as_double` fast paths.
    #[default]
    None,
    Int,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Format {
    pub leading_zero: bool,
    pub width: Option<usize>,
    pub precision: Option<usize>,
    pub cast: Cast,
}

/// Parses the region between `$` and `(`. Examples: `""`, `"i"`, `"f"`,
/// `"04i"`, `"05.3f"`, `".2f"`.
pub fn parse_format(spec: &str) -> Format {
    let mut fmt = Format::default();
    let body = if let Some(stripped) = spec.strip_suffix('i') {
        fmt.cast = Cast::Int;
        stripped
    } else if let Some(stripped) = spec.strip_suffix('f') {
        fmt.cast = Cast::Float;
        stripped
    } else {
        spec
    };
    if body.is_empty() {
        return fmt;
    }
    fmt.leading_zero = body.starts_with('0');
    let (width_str, precision_str) = match body.split_once('.') {
        Some((w, p)) => (w, Some(p)),
        None => (body, None),
    };
    if !width_str.is_empty() {
        fmt.width = width_str.parse().ok();
    }
    if let Some(p) = precision_str {
        fmt.precision = p.parse().ok().or(Some(0));
    }
    fmt
}

/// Renders an evaluated double according to the format.
pub fn apply(value: f64, fmt: &Format) -> String {
    match fmt.cast {
        Cast::Int => {
            let as_int = value.trunc() as i64;
            match (fmt.width, fmt.leading_zero) {
                (Some(w), true) => format!("{as_int:0w$}"),
                (Some(w), false) => format!("{as_int:w$}"),
                (None, _) => as_int.to_string(),
            }
        }
        Cast::Float | Cast::None => match (fmt.width, fmt.precision, fmt.leading_zero) {
            (Some(w), Some(p), true) => format!("{value:0w$.p$}"),
            (Some(w), Some(p), false) => format!("{value:w$.p$}"),
            (None, Some(p), _) => format!("{value:.p$}"),
            (Some(w), None, true) => format!("{value:0w$}"),
            (Some(w), None, false) => format!("{value:w$}"),
            (None, None, _) => value.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_shapes() {
        assert_eq!(parse_format(""), Format::default());
        assert_eq!(
            parse_format("i"),
            Format {
                cast: Cast::Int,
                ..Format::default()
            }
        );
        assert_eq!(
            parse_format("04i"),
            Format {
                cast: Cast::Int,
                leading_zero: true,
                width: Some(4),
                precision: None,
            }
        );
        assert_eq!(
            parse_format("05.3f"),
            Format {
                cast: Cast::Float,
                leading_zero: true,
                width: Some(5),
                precision: Some(3),
            }
        );
        assert_eq!(
            parse_format(".2f"),
            Format {
                cast: Cast::Float,
                leading_zero: false,
                width: None,
                precision: Some(2),
            }
        );
    }

    #[test]
    fn int_cast_truncates_toward_zero() {
        let fmt = parse_format("i");
        assert_eq!(apply(2.9, &fmt), "2");
        assert_eq!(apply(-2.9, &fmt), "-2");
    }

    #[test]
    fn zero_padding_and_precision() {
        assert_eq!(apply(3.14159, &parse_format("05.3f")), "3.142");
        assert_eq!(apply(3.14159, &parse_format("08.3f")), "0003.142");
        assert_eq!(apply(7.0, &parse_format("04i")), "0007");
        assert_eq!(apply(-7.0, &parse_format("04i")), "-007");
    }

    #[test]
    fn unformatted_is_minimal() {
        assert_eq!(apply(2.0, &Format::default()), "2");
        assert_eq!(apply(2.5, &Format::default()), "2.5");
    }

    #[test]
    fn space_padding() {
        assert_eq!(apply(42.0, &parse_format("5i")), "   42");
    }
}
