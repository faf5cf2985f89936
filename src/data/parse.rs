//! CSV parsing
//!
//! Header row, comma separated, RFC 4180 quoting (quoted fields may contain
//! commas, newlines and doubled quotes). Blank lines are skipped. Records whose
//! column count differs from the header are reported and dropped.

/// A problem found while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    /// 1-based line the record starts on
    pub line: usize,
    pub reason: String,
}

/// Result of parsing a CSV document
#[derive(Debug, Clone, Default)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
    pub issues: Vec<ParseIssue>,
}

/// Parse a CSV document with a header row
pub fn parse_csv(contents: &str) -> ParsedTable {
    let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
    let (records, mut issues) = split_records(contents);
    let mut records = records.into_iter();

    let Some((_, headers)) = records.next() else {
        return ParsedTable {
            issues,
            ..ParsedTable::default()
        };
    };
    let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for (line, record) in records {
        if record.len() != headers.len() {
            issues.push(ParseIssue {
                line,
                reason: format!("expected {} fields, found {}", headers.len(), record.len()),
            });
            continue;
        }
        rows.push(record);
    }

    ParsedTable {
        headers,
        records: rows,
        issues,
    }
}

fn split_records(contents: &str) -> (Vec<(usize, Vec<String>)>, Vec<ParseIssue>) {
    let mut records = Vec::new();
    let mut issues = Vec::new();

    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut line = 1;
    let mut record_line = 1;

    let mut chars = contents.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !quoted => {
                in_quotes = true;
                quoted = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                quoted = false;
            }
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                quoted = false;
                if !is_blank(&record) {
                    records.push((record_line, std::mem::take(&mut record)));
                }
                record.clear();
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        issues.push(ParseIssue {
            line: record_line,
            reason: "unterminated quoted field".to_string(),
        });
    } else if !field.is_empty() || !record.is_empty() || quoted {
        record.push(field);
        if !is_blank(&record) {
            records.push((record_line, record));
        }
    }

    (records, issues)
}

fn is_blank(record: &[String]) -> bool {
    record.len() == 1 && record[0].trim().is_empty()
}
