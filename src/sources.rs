use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::warn;

/// One spreadsheet row, keyed by its header text. Sources disagree on header
/// spelling, so lookups go through candidate lists instead of exact keys.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Rows of one source, grouped by student id.
pub type SourceTable = BTreeMap<String, Vec<RawRow>>;

/// Candidate header names per field, lowercase. First candidate that matches
/// a header (case-insensitive, trimmed) wins.
pub mod fields {
    pub const STUDENT_ID: &[&str] = &["student id", "student id number", "local id", "id"];
    pub const FIRST: &[&str] = &["first", "first name", "student first name"];
    pub const LAST: &[&str] = &["last", "last name", "student last name"];
    pub const NAME_COMBINED: &[&str] = &["student name", "name"];
    pub const GRADE: &[&str] = &["grade", "grade level", "grd level"];
    pub const ENTRY_DATE: &[&str] = &["entry date", "start date"];
    pub const WITHDRAWAL_DATE: &[&str] = &["withdrawal date", "wd date", "withdrawn date"];
    pub const FIRST_DAY: &[&str] = &["first day of aep", "first day"];
    pub const COURSE_TITLE: &[&str] = &["course title", "course name", "course"];
    pub const TEACHER_NAME: &[&str] = &["teacher name", "teacher"];
    pub const PERIOD_BEGIN: &[&str] = &["per beg", "period begin", "period"];
    pub const PLACEMENT_DAYS: &[&str] = &["placement days", "days placed"];
    pub const HOME_CAMPUS: &[&str] = &["home campus", "campus"];
    pub const ELIGIBILITY: &[&str] = &["eligibility"];
    pub const BEHAVIOR_CONTRACT: &[&str] = &["behavior contract"];
    pub const EDUCATIONAL_FACTORS: &[&str] = &["educational factors"];
    pub const STUDENT_EMAIL: &[&str] = &["student email", "student e-mail"];
    pub const GUARDIAN_NAME: &[&str] = &["guardian name", "parent name", "guardian"];
    pub const GUARDIAN_EMAIL: &[&str] = &["guardian email", "parent email"];
    pub const DAYS_IN_ATTENDANCE: &[&str] = &["days in attendance", "attendance days"];
    pub const DAYS_IN_ENROLLMENT: &[&str] = &["days in enrollment", "enrollment days"];
    pub const TIMESTAMP: &[&str] = &["timestamp", "date", "submit time", "submitted at"];
    pub const CASE_MANAGER: &[&str] = &["case manager"];
    pub const GROWTH_ASSESSMENT: &[&str] = &["growth assessment", "growth", "student growth"];
    pub const PROGRESS_NOTES: &[&str] = &["progress notes", "notes"];
    pub const ACCOMMODATIONS: &[&str] = &["accommodations"];
    pub const BEHAVIOR_STRENGTHS: &[&str] = &["behavior strengths", "behavioral strengths"];
    pub const BEHAVIOR_NEEDS: &[&str] = &["behavior needs", "behavioral needs"];
    pub const FUNCTIONAL_NEEDS: &[&str] = &["functional needs", "functional skill needs"];
    pub const COMMENTS: &[&str] = &["comments"];
}

pub fn value_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                n.to_string()
            }
        }
        serde_json::Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn field<'a>(row: &'a RawRow, candidates: &[&str]) -> Option<&'a serde_json::Value> {
    for cand in candidates {
        for (key, value) in row {
            if key.trim().eq_ignore_ascii_case(cand) {
                return Some(value);
            }
        }
    }
    None
}

/// Non-empty trimmed text of the first matching header, or None.
pub fn field_str(row: &RawRow, candidates: &[&str]) -> Option<String> {
    let v = field(row, candidates)?;
    let t = value_text(v);
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

pub fn field_number(row: &RawRow, candidates: &[&str]) -> Option<f64> {
    let v = field(row, candidates)?;
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn set_field(row: &mut RawRow, candidates: &[&str], canonical_key: &str, value: &str) {
    for cand in candidates {
        let existing = row
            .keys()
            .find(|k| k.trim().eq_ignore_ascii_case(cand))
            .cloned();
        if let Some(key) = existing {
            row.insert(key, serde_json::Value::String(value.to_string()));
            return;
        }
    }
    row.insert(
        canonical_key.to_string(),
        serde_json::Value::String(value.to_string()),
    );
}

/// First 6-7 digit run in free text, e.g. `"Doe, Jane (123456)"`.
pub fn extract_student_id(text: &str) -> Option<String> {
    let mut run = String::new();
    for ch in text.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_digit() {
            run.push(ch);
        } else {
            if (6..=7).contains(&run.len()) {
                return Some(run);
            }
            run.clear();
        }
    }
    None
}

pub fn student_id_of(row: &RawRow) -> Option<String> {
    if let Some(direct) = field_str(row, fields::STUDENT_ID) {
        if (6..=7).contains(&direct.len()) && direct.chars().all(|c| c.is_ascii_digit()) {
            return Some(direct);
        }
        if let Some(id) = extract_student_id(&direct) {
            return Some(id);
        }
    }
    // No id column; pattern-match any free-text cell.
    for v in row.values() {
        if let serde_json::Value::String(s) = v {
            if let Some(id) = extract_student_id(s) {
                return Some(id);
            }
        }
    }
    None
}

/// Group loader rows by student id. Rows with no recognizable id are logged
/// and dropped, never fatal.
pub fn key_rows(source: &str, rows: &[serde_json::Value]) -> SourceTable {
    let mut table = SourceTable::new();
    for v in rows {
        let Some(row) = v.as_object() else {
            warn!(source, "skipping non-object row");
            continue;
        };
        let Some(id) = student_id_of(row) else {
            warn!(source, "skipping row with no student id");
            continue;
        };
        table.entry(id).or_default().push(row.clone());
    }
    table
}

pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    // Tolerate datetime strings; the date is the leading token.
    let head = t.split_whitespace().next().unwrap_or(t);
    let head = head.split('T').next().unwrap_or(head);
    for fmt in ["%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(head, fmt) {
            return Some(d);
        }
    }
    None
}

pub fn parse_date_value(v: &serde_json::Value) -> Option<NaiveDate> {
    match v {
        serde_json::Value::String(s) => parse_date_str(s),
        _ => None,
    }
}

pub fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    for fmt in [
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(dt);
        }
    }
    parse_date_str(t).and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_mdy(d: NaiveDate) -> String {
    d.format("%m/%d/%Y").to_string()
}

pub fn format_ymd(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}
