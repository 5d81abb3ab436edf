use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid regex"))
}

/// Extract the first valid `YYYY-MM-DD` date from a free-form hint.
///
/// Ranges such as `"2023-05-07 to 2023-05-09"` yield their first date.
/// Matches that are not real calendar days (`2023-02-30`) are skipped.
pub fn parse_date_hint(hint: &str) -> Option<NaiveDate> {
    iso_date_re()
        .find_iter(hint)
        .find_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn range_yields_first_date() {
        assert_eq!(parse_date_hint("2023-05-07 to 2023-05-09"), Some(d("2023-05-07")));
    }

    #[test]
    fn embedded_in_prose() {
        assert_eq!(
            parse_date_hint("The event actually happened on 2021-09-07 in El Salvador."),
            Some(d("2021-09-07"))
        );
    }

    #[test]
    fn invalid_calendar_day_is_skipped() {
        assert_eq!(parse_date_hint("2023-02-30 or 2023-03-01"), Some(d("2023-03-01")));
    }

    #[test]
    fn unparseable_hint() {
        assert_eq!(parse_date_hint("sometime in early May"), None);
        assert_eq!(parse_date_hint(""), None);
    }
}
