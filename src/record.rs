// Student record entity and date helpers

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One student row in the roster file.
///
/// The entity carries no invariants of its own. Id positivity, the name and
/// email rules, and uniqueness are enforced by the store and the validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub full_name: String,
    pub age: i32,
    pub address: String,
    pub course_year: String,
    pub birthday: Option<NaiveDate>,
    pub email: String,
}

impl Record {
    pub fn new(id: i64, full_name: impl Into<String>, age: i32) -> Self {
        Self {
            id,
            full_name: full_name.into(),
            age,
            ..Self::default()
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_course_year(mut self, course_year: impl Into<String>) -> Self {
        self.course_year = course_year.into();
        self
    }

    pub fn with_birthday(mut self, birthday: Option<NaiveDate>) -> Self {
        self.birthday = birthday;
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Primary key used for every lookup, replacement and removal
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Trimmed, case-folded full name, or `None` when blank
    pub fn normalized_name(&self) -> Option<String> {
        normalize(&self.full_name)
    }

    /// Trimmed, case-folded email, or `None` when blank
    pub fn normalized_email(&self) -> Option<String> {
        normalize(&self.email)
    }

    /// Birthday as `YYYY-MM-DD`, or an empty string when absent
    pub fn birthday_iso(&self) -> String {
        format_date(self.birthday)
    }
}

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

/// Parse a strict ISO calendar date, `None` on blank or malformed input
///
/// Only the zero-padded `YYYY-MM-DD` layout is accepted.
pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    let bytes = text.as_bytes();
    let shaped = bytes.len() == 10
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { *b == b'-' } else { b.is_ascii_digit() });
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

// Tried in order, first match wins. Month-first beats day-first for ambiguous input.
const FLEXIBLE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%Y.%m.%d",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
];

/// Parse a user-typed date in any of the accepted layouts
///
/// Accepts ISO dates plus the slash, dash, dot and month-name forms people
/// commonly type. Returns `None` for blank input or when no layout matches.
pub fn parse_flexible_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    FLEXIBLE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_normalized_name_and_email() {
        let record = Record::new(1, "  Jane DOE ", 20).with_email(" Jane@X.com");
        assert_eq!(record.normalized_name().as_deref(), Some("jane doe"));
        assert_eq!(record.normalized_email().as_deref(), Some("jane@x.com"));

        let blank = Record::new(2, "   ", 20);
        assert!(blank.normalized_name().is_none());
        assert!(blank.normalized_email().is_none());
    }

    #[test]
    fn test_birthday_iso() {
        let record = Record::new(1, "Jane", 20).with_birthday(Some(date(2003, 5, 1)));
        assert_eq!(record.birthday_iso(), "2003-05-01");
        assert_eq!(Record::new(1, "Jane", 20).birthday_iso(), "");
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(parse_iso_date("2003-05-01"), Some(date(2003, 5, 1)));
        assert_eq!(parse_iso_date(""), None);
        assert_eq!(parse_iso_date("2003-13-01"), None);
        assert_eq!(parse_iso_date("not a date"), None);
        assert_eq!(parse_iso_date("2003-5-1"), None);
        assert_eq!(parse_iso_date("2003-05-1"), None);
        assert_eq!(parse_iso_date(" 2003-05-01"), None);
        assert_eq!(parse_iso_date("2003/05/01"), None);
    }

    #[test]
    fn test_parse_flexible_date() {
        assert_eq!(parse_flexible_date("2003-05-01"), Some(date(2003, 5, 1)));
        assert_eq!(parse_flexible_date(" 5/1/2003 "), Some(date(2003, 5, 1)));
        assert_eq!(parse_flexible_date("13/1/2003"), Some(date(2003, 1, 13)));
        assert_eq!(parse_flexible_date("2003/05/01"), Some(date(2003, 5, 1)));
        assert_eq!(parse_flexible_date("2003.05.01"), Some(date(2003, 5, 1)));
        assert_eq!(parse_flexible_date("May 1, 2003"), Some(date(2003, 5, 1)));
        assert_eq!(parse_flexible_date("1 May 2003"), Some(date(2003, 5, 1)));
        assert_eq!(parse_flexible_date(""), None);
        assert_eq!(parse_flexible_date("yesterday"), None);
    }

    #[test]
    fn test_record_serialization() {
        let record = Record::new(7, "Jane Doe", 20).with_birthday(Some(date(2003, 5, 1)));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"birthday\":\"2003-05-01\""));
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
