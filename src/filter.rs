// Free-text search over records

use crate::record::Record;

/// Case-insensitive substring filter across every displayed field
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Trimmed, lower-cased query; empty matches everything
    query: String,
}

impl Filter {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.trim().to_lowercase(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.query.is_empty() {
            return true;
        }
        let q = self.query.as_str();
        contains(&record.id.to_string(), q)
            || contains(&record.full_name, q)
            || contains(&record.age.to_string(), q)
            || contains(&record.address, q)
            || contains(&record.course_year, q)
            || contains(&record.email, q)
            || (record.birthday.is_some() && contains(&record.birthday_iso(), q))
    }
}

fn contains(value: &str, query: &str) -> bool {
    value.to_lowercase().contains(query)
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.query.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.query)
        }
    }
}
