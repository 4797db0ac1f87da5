// Business rules for student records
//
// `validate` is advisory and collects every violation. `add`/`update` on the
// store enforce uniqueness through the same `uniqueness_conflicts` check.

use crate::record::Record;
use chrono::{Local, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

pub const MIN_AGE: i32 = 0;
pub const MAX_AGE: i32 = 150;

pub const MSG_INVALID_ID: &str = "ID number must be a positive integer";
pub const MSG_AGE_RANGE: &str = "Age must be between 0 and 150";
pub const MSG_INVALID_EMAIL: &str = "Invalid email format";
pub const MSG_FUTURE_BIRTHDAY: &str = "Birthday cannot be in the future";
pub const MSG_NAME_DIGITS: &str = "Full name cannot contain numbers";
pub const MSG_DUPLICATE_ID: &str = "ID already exists";
pub const MSG_DUPLICATE_NAME: &str = "Full name already exists";
pub const MSG_DUPLICATE_EMAIL: &str = "Email already exists";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\n\r]+@[^@\n\r]+\.[^@\n\r]+$").expect("valid email regex"));

/// Why the store refused a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// The id (or the id being replaced) is not positive
    InvalidId,
    /// No record is stored under the id being replaced
    NotFound(i64),
    DuplicateId,
    DuplicateName,
    DuplicateEmail,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::InvalidId => write!(f, "{}", MSG_INVALID_ID),
            Conflict::NotFound(id) => write!(f, "Student not found: {}", id),
            Conflict::DuplicateId => write!(f, "{}", MSG_DUPLICATE_ID),
            Conflict::DuplicateName => write!(f, "{}", MSG_DUPLICATE_NAME),
            Conflict::DuplicateEmail => write!(f, "{}", MSG_DUPLICATE_EMAIL),
        }
    }
}

impl std::error::Error for Conflict {}

/// Minimal `local@domain.tld` shape check
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Uniqueness violations of `candidate` against `records`
///
/// `replacing` names the id of the stored record the candidate would replace,
/// which is exempt from every check. This lets an update keep its own id, name
/// and email even when the candidate changes its id. Without `replacing`, name
/// and email are compared only against records under a different id than the
/// candidate's. With `check_id` false the id check is skipped.
pub fn uniqueness_conflicts(
    records: &[Record],
    candidate: &Record,
    replacing: Option<i64>,
    check_id: bool,
) -> Vec<Conflict> {
    let owner = replacing.unwrap_or(candidate.id);
    let others = || records.iter().filter(move |r| r.id != owner);
    let mut conflicts = Vec::new();

    if check_id && records.iter().any(|r| Some(r.id) != replacing && r.id == candidate.id) {
        conflicts.push(Conflict::DuplicateId);
    }

    if let Some(name) = candidate.normalized_name() {
        if others().any(|r| r.normalized_name().as_deref() == Some(name.as_str())) {
            conflicts.push(Conflict::DuplicateName);
        }
    }

    if let Some(email) = candidate.normalized_email() {
        if others().any(|r| r.normalized_email().as_deref() == Some(email.as_str())) {
            conflicts.push(Conflict::DuplicateEmail);
        }
    }

    conflicts
}

/// Check every rule against `record` and collect the violations
///
/// Field rules always run. With `records` supplied, name and email must be
/// unique among records other than the one stored under `original_id` (or
/// under the record's own id when there is no original id), and
/// with `check_duplicate_id` the id must be free as well.
pub fn validate(
    record: &Record,
    check_duplicate_id: bool,
    records: Option<&[Record]>,
    original_id: Option<i64>,
) -> Vec<String> {
    validate_on(record, check_duplicate_id, records, original_id, Local::now().date_naive())
}

/// `validate` against an explicit current date
pub fn validate_on(
    record: &Record,
    check_duplicate_id: bool,
    records: Option<&[Record]>,
    original_id: Option<i64>,
    today: NaiveDate,
) -> Vec<String> {
    let mut errors = Vec::new();

    if record.id <= 0 {
        errors.push(MSG_INVALID_ID.to_string());
    }
    if !(MIN_AGE..=MAX_AGE).contains(&record.age) {
        errors.push(MSG_AGE_RANGE.to_string());
    }
    if !record.email.trim().is_empty() && !is_valid_email(&record.email) {
        errors.push(MSG_INVALID_EMAIL.to_string());
    }
    if record.birthday.is_some_and(|dob| dob > today) {
        errors.push(MSG_FUTURE_BIRTHDAY.to_string());
    }
    if record.full_name.trim().chars().any(|c| c.is_ascii_digit()) {
        errors.push(MSG_NAME_DIGITS.to_string());
    }

    if let Some(records) = records {
        for conflict in uniqueness_conflicts(records, record, original_id, check_duplicate_id) {
            errors.push(conflict.to_string());
        }
    }

    errors
}

/// Join validation messages for a single status line
pub fn join_errors(errors: &[String]) -> String {
    errors.join("; ")
}
