use std::str::FromStr;

use rust_decimal::Decimal;

/// Parse locale-formatted numeric text into a [`Decimal`].
///
/// Accepts both the fiscal XML notation (`1234.56`) and the Brazilian display
/// notation (`1.234,56`). Never fails: empty, absent or unparseable input
/// yields zero.
///
/// Separator rules:
/// - both `,` and `.` present: `.` groups thousands, `,` is the decimal mark
/// - only `,` present: `,` is the decimal mark
/// - only `.` present, exactly once: `.` is the decimal mark
/// - only `.` present, more than once: `.` groups thousands
pub fn parse_locale_decimal(text: Option<&str>) -> Decimal {
    parse_optional_decimal(text).unwrap_or(Decimal::ZERO)
}

/// Like [`parse_locale_decimal`] but distinguishes "absent or garbage"
/// (`None`) from a parsed value.
pub fn parse_optional_decimal(text: Option<&str>) -> Option<Decimal> {
    let raw = text?;
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let has_comma = compact.contains(',');
    let dots = compact.matches('.').count();

    let normalized = if has_comma {
        if compact.matches(',').count() > 1 {
            return None;
        }
        compact.replace('.', "").replace(',', ".")
    } else if dots > 1 {
        compact.replace('.', "")
    } else {
        compact
    };

    // Decimal::from_str accepts a sign and digits with one '.', nothing else
    // we care about; reject exponents and stray characters up front.
    let body = normalized
        .strip_prefix(['-', '+'])
        .unwrap_or(normalized.as_str());
    if body.is_empty() || body == "." || !body.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return None;
    }

    Decimal::from_str(&normalized).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p(s: &str) -> Decimal {
        parse_locale_decimal(Some(s))
    }

    #[test]
    fn xml_notation() {
        assert_eq!(p("11111.31"), dec!(11111.31));
        assert_eq!(p("0.0000"), dec!(0));
        assert_eq!(p("12"), dec!(12));
    }

    #[test]
    fn brazilian_notation() {
        assert_eq!(p("1.234,56"), dec!(1234.56));
        assert_eq!(p("9.305,70"), dec!(9305.70));
        assert_eq!(p("0,5"), dec!(0.5));
        assert_eq!(p("1.234.567"), dec!(1234567));
    }

    #[test]
    fn whitespace_is_stripped() {
        assert_eq!(p("  1 234,00 \n"), dec!(1234.00));
        assert_eq!(p("\t42.10"), dec!(42.10));
    }

    #[test]
    fn signs() {
        assert_eq!(p("-3,25"), dec!(-3.25));
        assert_eq!(p("+7"), dec!(7));
    }

    #[test]
    fn garbage_is_zero() {
        assert_eq!(parse_locale_decimal(None), Decimal::ZERO);
        assert_eq!(p(""), Decimal::ZERO);
        assert_eq!(p("   "), Decimal::ZERO);
        assert_eq!(p("abc"), Decimal::ZERO);
        assert_eq!(p("12abc"), Decimal::ZERO);
        assert_eq!(p("1e5"), Decimal::ZERO);
        assert_eq!(p("1,2,3"), Decimal::ZERO);
        assert_eq!(p("-"), Decimal::ZERO);
        assert_eq!(p("."), Decimal::ZERO);
        assert_eq!(p("NaN"), Decimal::ZERO);
    }

    #[test]
    fn optional_distinguishes_absence() {
        assert_eq!(parse_optional_decimal(None), None);
        assert_eq!(parse_optional_decimal(Some("x")), None);
        assert_eq!(parse_optional_decimal(Some("0")), Some(Decimal::ZERO));
    }

    #[test]
    fn idempotent_on_own_output() {
        let first = p("1.234,56");
        assert_eq!(p(&first.to_string()), first);
    }
}
