// Line codec for the roster file
//
// Writes only the canonical pipe-delimited form. Reads the canonical form plus
// the two historical layouts: the 7-line block and the comma-separated line.

use crate::record::{Record, format_date, parse_iso_date};
use eyre::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info, warn};

/// Field separator of the canonical format
pub const DELIMITER: char = '|';

/// Number of fields in a canonical line and lines in a legacy block
pub const FIELD_COUNT: usize = 7;

/// Field count of the oldest comma layout, which had no full name column
const LEGACY_CSV_SHORT_COUNT: usize = 6;

/// Encode a record as one canonical line (no trailing newline)
pub fn encode(record: &Record) -> String {
    let fields = [
        record.id.to_string(),
        escape_field(&record.full_name),
        record.age.to_string(),
        escape_field(&record.address),
        escape_field(&record.course_year),
        format_date(record.birthday),
        escape_field(&record.email),
    ];
    fields.join("|")
}

/// Decode one record from canonical, legacy block, or legacy CSV text
///
/// Returns `None` when the text cannot produce a record with a positive id.
/// A malformed age decodes as 0 and a malformed birthday as absent.
pub fn decode(text: &str) -> Option<Record> {
    if text.is_empty() {
        return None;
    }
    if text.contains(DELIMITER) {
        decode_canonical(text)
    } else if text.matches('\n').count() >= FIELD_COUNT - 1 {
        decode_block(text)
    } else {
        decode_csv(text)
    }
}

/// Decode a pipe-delimited line; fields past the seventh are ignored
pub fn decode_canonical(line: &str) -> Option<Record> {
    let parts: Vec<&str> = line.split(DELIMITER).collect();
    if parts.len() < FIELD_COUNT {
        return None;
    }
    build(
        parts[0],
        unescape_field(parts[1]),
        parts[2],
        unescape_field(parts[3]),
        unescape_field(parts[4]),
        parts[5],
        unescape_field(parts[6]),
    )
}

/// Decode a legacy block: seven newline-separated fields, no escaping
pub fn decode_block(text: &str) -> Option<Record> {
    let parts: Vec<&str> = text.splitn(FIELD_COUNT, '\n').collect();
    if parts.len() < FIELD_COUNT {
        return None;
    }
    build(
        parts[0],
        parts[1].to_string(),
        parts[2],
        parts[3].to_string(),
        parts[4].to_string(),
        parts[5],
        parts[6].to_string(),
    )
}

/// Decode a legacy comma line with 7 fields, or 6 fields without the full name
pub fn decode_csv(line: &str) -> Option<Record> {
    let fields = split_csv(line)?;
    match fields.len() {
        FIELD_COUNT => build(
            &fields[0],
            fields[1].clone(),
            &fields[2],
            fields[3].clone(),
            fields[4].clone(),
            &fields[5],
            fields[6].clone(),
        ),
        LEGACY_CSV_SHORT_COUNT => build(
            &fields[0],
            String::new(),
            &fields[1],
            fields[2].clone(),
            fields[3].clone(),
            &fields[4],
            fields[5].clone(),
        ),
        _ => None,
    }
}

fn build(
    id: &str,
    full_name: String,
    age: &str,
    address: String,
    course_year: String,
    birthday: &str,
    email: String,
) -> Option<Record> {
    let id = id.trim().parse::<i64>().ok().filter(|id| *id > 0)?;
    Some(Record {
        id,
        full_name,
        age: age.trim().parse().unwrap_or(0),
        address,
        course_year,
        birthday: parse_iso_date(birthday),
        email,
    })
}

/// Escape a free-text field for the canonical format
///
/// Backslash is replaced first so the later substitutions are not re-escaped.
pub fn escape_field(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('|', "\\p")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

/// Reverse `escape_field`
///
/// Unknown escapes emit the escaped character unchanged and a trailing lone
/// backslash is kept as-is.
pub fn unescape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('p') => out.push(DELIMITER),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split one comma-separated line with RFC 4180 quoting
///
/// Returns `None` when a quoted field is left unterminated.
pub fn split_csv(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return None;
    }
    fields.push(field);
    Some(fields)
}

fn looks_like_csv(line: &str) -> bool {
    line.contains(',')
        && split_csv(line)
            .map(|fields| fields.len() == FIELD_COUNT || fields.len() == LEGACY_CSV_SHORT_COUNT)
            .unwrap_or(false)
}

/// Read every decodable record from a roster document, in file order
///
/// Blank lines are skipped. Lines holding the delimiter decode as canonical
/// lines. At a record boundary, a line that splits into 6 or 7 comma fields
/// decodes as legacy CSV. Any other line is buffered, and every seven
/// buffered lines decode as one legacy block. An unfinished block is dropped
/// when a canonical line interrupts it or the input ends. Undecodable
/// records are skipped with a warning. Duplicates are not filtered here.
pub fn read_records<R: BufRead>(reader: R, source: &Path) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut block: Vec<String> = Vec::with_capacity(FIELD_COUNT);
    let mut block_start = 0;

    for (index, line) in reader.lines().enumerate() {
        let line_num = index + 1;
        let line = line.with_context(|| format!("Failed to read line {} of {}", line_num, source.display()))?;

        if line.trim().is_empty() {
            continue;
        }

        if line.contains(DELIMITER) {
            if !block.is_empty() {
                warn!(
                    file = ?source,
                    line = block_start,
                    lines = block.len(),
                    "Discarding incomplete legacy block"
                );
                block.clear();
            }
            push_decoded(&mut records, decode_canonical(&line), source, line_num);
            continue;
        }

        if block.is_empty() && looks_like_csv(&line) {
            push_decoded(&mut records, decode_csv(&line), source, line_num);
            continue;
        }

        if block.is_empty() {
            block_start = line_num;
        }
        block.push(line);
        if block.len() == FIELD_COUNT {
            push_decoded(&mut records, decode_block(&block.join("\n")), source, block_start);
            block.clear();
        }
    }

    if !block.is_empty() {
        warn!(
            file = ?source,
            line = block_start,
            lines = block.len(),
            "Discarding incomplete legacy block at end of file"
        );
    }

    info!(file = ?source, count = records.len(), "Decoded records from roster file");
    Ok(records)
}

fn push_decoded(records: &mut Vec<Record>, decoded: Option<Record>, source: &Path, line: usize) {
    match decoded {
        Some(record) => {
            debug!(file = ?source, line, id = record.id, "Decoded record");
            records.push(record);
        }
        None => warn!(file = ?source, line, "Failed to decode record, skipping"),
    }
}
