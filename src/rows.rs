use anyhow::anyhow;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::merge::{MergedRoster, MergedStudent};
use crate::reconcile::{reconcile, Period, TeacherInput};
use crate::release;
use crate::schedule;
use crate::sources::{field_number, field_str, fields, format_mdy, value_text, RawRow};

pub const PERIOD_FIELDS: [&str; 6] = [
    "Course Title",
    "Teacher Name",
    "Transfer Grade",
    "Current Grade",
    "Growth Assessment",
    "Progress Notes",
];

pub const SPECIAL_ED_FIELDS: [&str; 6] = [
    "Case Manager",
    "Accommodations",
    "Behavior Strengths",
    "Behavior Needs",
    "Functional Needs",
    "Comments",
];

pub const TRAILING_COLUMNS: [&str; 24] = [
    "Home Campus",
    "First Day of AEP",
    "Anticipated Release Date",
    "Parent Notice Date",
    "Withdrawn Date",
    "Attendance Recovery",
    "Eligibility",
    "Credit Retrieval",
    "Behavior Contract",
    "Campus Mentor",
    "Other Intervention 1",
    "Other Intervention 2",
    "504",
    "ESL",
    "Additional Notes",
    "Social Worker Consult",
    "Ready For Letter",
    "Student Email",
    "Guardian Name",
    "Guardian Email",
    "Merged Doc ID",
    "Merged Doc URL",
    "Merged Doc Link",
    "Merge Status",
];

/// 5 identity + 8 periods x 6 + Special Education block + trailing fields.
/// Column order is a contract with the destination sheet.
pub const WIDTH: usize = 5 + 8 * PERIOD_FIELDS.len() + SPECIAL_ED_FIELDS.len() + TRAILING_COLUMNS.len();

pub const COL_LAST: usize = 1;
pub const COL_STUDENT_ID: usize = 3;
pub const COL_ANTICIPATED_RELEASE: usize = 61;
pub const COL_IS_504: usize = 71;
pub const COL_IS_ESL: usize = 72;
pub const COL_ADDITIONAL_NOTES: usize = 73;
pub const COL_MERGE_STATUS: usize = WIDTH - 1;

pub fn columns() -> Vec<String> {
    let mut cols = vec![
        "Date Added".to_string(),
        "LAST".to_string(),
        "FIRST".to_string(),
        "Student ID".to_string(),
        "GRADE".to_string(),
    ];
    for period in Period::CLASS_PERIODS {
        for f in PERIOD_FIELDS {
            cols.push(format!("{} Period - {}", period.label(), f));
        }
    }
    for f in SPECIAL_ED_FIELDS {
        cols.push(format!("Special Education - {}", f));
    }
    cols.extend(TRAILING_COLUMNS.iter().map(|c| c.to_string()));
    cols
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedStudent {
    pub student_id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RowBatch {
    pub rows: Vec<Vec<String>>,
    pub skipped: Vec<SkippedStudent>,
    pub error_row_ids: Vec<String>,
}

/// Entry date for output purposes: entry/withdrawal, then the roster sheet,
/// then the most recent active schedule enrollment.
pub fn resolved_entry_date(record: &MergedStudent) -> Option<NaiveDate> {
    record
        .entry_date()
        .or_else(|| schedule::most_recent_entry_date(&record.schedules))
}

pub fn build_rows(
    roster: &MergedRoster,
    backup_registrations: &[RawRow],
    cfg: &Config,
    today: NaiveDate,
) -> RowBatch {
    build_rows_with(roster, |id, record| {
        build_row(id, record, backup_registrations, cfg, today)
    })
}

/// Batch driver, generic over the per-student builder so degradation is
/// testable in isolation. A student with no entry date is skipped; a builder
/// error becomes a visibly-marked error row. Neither stops the batch.
pub fn build_rows_with<F>(roster: &MergedRoster, mut build: F) -> RowBatch
where
    F: FnMut(&str, &MergedStudent) -> anyhow::Result<Vec<String>>,
{
    let mut batch = RowBatch::default();
    for (id, record) in roster {
        if resolved_entry_date(record).is_none() {
            warn!(student = id, "no entry date on file; skipping row");
            batch.skipped.push(SkippedStudent {
                student_id: id.clone(),
                reason: "no entry date".to_string(),
            });
            continue;
        }
        match build(id, record) {
            Ok(row) => batch.rows.push(row),
            Err(e) => {
                warn!(student = id, error = %e, "row build failed; emitting error row");
                batch.error_row_ids.push(id.clone());
                batch.rows.push(error_row(id, &e.to_string()));
            }
        }
    }
    batch
}

pub fn build_row(
    student_id: &str,
    record: &MergedStudent,
    backup_registrations: &[RawRow],
    cfg: &Config,
    today: NaiveDate,
) -> anyhow::Result<Vec<String>> {
    let entry = resolved_entry_date(record).ok_or_else(|| anyhow!("no entry date"))?;
    let tentative = record.tentative_row();
    let registration = record.registrations.first();
    let contact = record.contact_info.first();
    let attendance = record.attendance.first();

    let input = reconcile(
        student_id,
        &record.form_responses,
        &record.schedules,
        tentative,
        &cfg.case_manager_course,
    );

    let placement = release::placement_days(registration, student_id, backup_registrations);
    let days_attended = attendance.and_then(|r| field_number(r, fields::DAYS_IN_ATTENDANCE));
    let days_enrolled = attendance.and_then(|r| field_number(r, fields::DAYS_IN_ENROLLMENT));
    let exit = release::estimate_exit_date(
        Some(entry),
        placement,
        days_attended,
        days_enrolled,
        &cfg.holidays,
    );

    let (is_504, is_esl) = educational_factor_flags(registration);

    let mut row: Vec<String> = Vec::with_capacity(WIDTH);
    row.push(carry(tentative, "Date Added").unwrap_or_else(|| format_mdy(today)));
    row.push(opt(tentative, fields::LAST));
    row.push(opt(tentative, fields::FIRST));
    row.push(student_id.to_string());
    row.push(opt(tentative, fields::GRADE));

    push_teacher_input(&mut row, &input);

    row.push(opt(registration, fields::HOME_CAMPUS));
    row.push(format_mdy(entry));
    row.push(exit.map(format_mdy).unwrap_or_default());
    row.push(carry(tentative, "Parent Notice Date").unwrap_or_default());
    row.push(carry(tentative, "Withdrawn Date").unwrap_or_default());
    row.push(carry(tentative, "Attendance Recovery").unwrap_or_default());
    row.push(opt(registration, fields::ELIGIBILITY));
    row.push(carry(tentative, "Credit Retrieval").unwrap_or_default());
    row.push(opt(registration, fields::BEHAVIOR_CONTRACT));
    row.push(carry(tentative, "Campus Mentor").unwrap_or_default());
    row.push(carry(tentative, "Other Intervention 1").unwrap_or_default());
    row.push(carry(tentative, "Other Intervention 2").unwrap_or_default());
    row.push(is_504);
    row.push(is_esl);
    row.push(carry(tentative, "Additional Notes").unwrap_or_default());
    row.push(carry(tentative, "Social Worker Consult").unwrap_or_default());
    row.push(carry(tentative, "Ready For Letter").unwrap_or_default());
    row.push(opt(contact, fields::STUDENT_EMAIL));
    row.push(opt(contact, fields::GUARDIAN_NAME));
    row.push(opt(contact, fields::GUARDIAN_EMAIL));
    row.push(carry(tentative, "Merged Doc ID").unwrap_or_default());
    row.push(carry(tentative, "Merged Doc URL").unwrap_or_default());
    row.push(carry(tentative, "Merged Doc Link").unwrap_or_default());
    row.push(carry(tentative, "Merge Status").unwrap_or_default());

    debug_assert_eq!(row.len(), WIDTH);
    Ok(row)
}

fn push_teacher_input(row: &mut Vec<String>, input: &TeacherInput) {
    for period in Period::CLASS_PERIODS {
        let slot = input.period(period).cloned().unwrap_or_default();
        row.push(slot.course_title);
        row.push(slot.teacher_name);
        row.push(slot.transfer_grade);
        row.push(slot.current_grade);
        row.push(slot.growth_assessment);
        row.push(slot.progress_notes);
    }
    let sped = &input.special_education;
    row.push(sped.case_manager.clone());
    row.push(sped.accommodations.clone());
    row.push(sped.behavior_strengths.clone());
    row.push(sped.behavior_needs.clone());
    row.push(sped.functional_needs.clone());
    row.push(sped.comments.clone());
}

/// The 504/ESL indicators are case-sensitive substring checks of the
/// free-text educational-factors column, not structured flags.
pub fn educational_factor_flags(registration: Option<&RawRow>) -> (String, String) {
    let factors = registration
        .and_then(|r| field_str(r, fields::EDUCATIONAL_FACTORS))
        .unwrap_or_default();
    let yes_no = |b: bool| if b { "Yes" } else { "No" }.to_string();
    (yes_no(factors.contains("504")), yes_no(factors.contains("ESL")))
}

/// Fixed-width placeholder so one broken student stays visible without
/// aborting the batch.
pub fn error_row(student_id: &str, message: &str) -> Vec<String> {
    let mut row = vec![String::new(); WIDTH];
    row[COL_LAST] = "ERROR".to_string();
    row[COL_STUDENT_ID] = student_id.to_string();
    row[COL_ADDITIONAL_NOTES] = message.to_string();
    row[COL_MERGE_STATUS] = "ERROR".to_string();
    row
}

/// Carried-forward human-edited columns read straight off the legacy
/// tentative row by header name.
fn carry(tentative: Option<&RawRow>, header: &str) -> Option<String> {
    let row = tentative?;
    row.iter()
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(header))
        .map(|(_, v)| value_text(v))
        .filter(|t| !t.is_empty())
}

fn opt(row: Option<&RawRow>, candidates: &[&str]) -> String {
    row.and_then(|r| field_str(r, candidates)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{merge, Sources};
    use crate::sources::{key_rows, SourceTable};
    use serde_json::json;

    fn table(source: &str, v: serde_json::Value) -> SourceTable {
        key_rows(source, v.as_array().expect("array"))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 25).expect("date")
    }

    fn roster_of_three() -> MergedRoster {
        let sources = Sources {
            tentative: table(
                "tentative",
                json!([
                    { "Student ID": "111111", "LAST": "Aa", "FIRST": "A", "GRADE": "7" },
                    { "Student ID": "222222", "LAST": "Bb", "FIRST": "B", "GRADE": "8" },
                    { "Student ID": "333333", "LAST": "Cc", "FIRST": "C", "GRADE": "9" }
                ]),
            ),
            registrations: SourceTable::new(),
            contact_info: SourceTable::new(),
            schedules: SourceTable::new(),
            form_responses: SourceTable::new(),
            attendance: SourceTable::new(),
            entry_withdrawal: table(
                "entryWithdrawal",
                json!([
                    { "Student ID": "111111", "Entry Date": "08/11/2025" },
                    { "Student ID": "222222", "Entry Date": "08/11/2025" },
                    { "Student ID": "333333", "Entry Date": "08/11/2025" }
                ]),
            ),
        };
        merge(&sources)
    }

    #[test]
    fn column_contract_width_is_stable() {
        assert_eq!(WIDTH, 83);
        assert_eq!(columns().len(), WIDTH);
        assert_eq!(columns()[COL_ANTICIPATED_RELEASE], "Anticipated Release Date");
        assert_eq!(columns()[COL_IS_504], "504");
        assert_eq!(columns()[COL_IS_ESL], "ESL");
        assert_eq!(columns()[COL_MERGE_STATUS], "Merge Status");
    }

    #[test]
    fn educational_factor_flags_are_substring_matches() {
        let reg = json!({ "Educational Factors": "Section 504, ESL Services" });
        let reg = reg.as_object().expect("object").clone();
        assert_eq!(
            educational_factor_flags(Some(&reg)),
            ("Yes".to_string(), "Yes".to_string())
        );
        assert_eq!(
            educational_factor_flags(None),
            ("No".to_string(), "No".to_string())
        );
        let reg = json!({ "Educational Factors": "esl" });
        let reg = reg.as_object().expect("object").clone();
        // Case-sensitive on purpose.
        assert_eq!(educational_factor_flags(Some(&reg)).1, "No");
    }

    #[test]
    fn one_failing_student_degrades_to_an_error_row() {
        let roster = roster_of_three();
        let batch = build_rows_with(&roster, |id, record| {
            if id == "222222" {
                anyhow::bail!("synthetic failure");
            }
            build_row(id, record, &[], &Config::default(), today())
        });
        assert_eq!(batch.rows.len(), 3);
        assert_eq!(batch.error_row_ids, vec!["222222".to_string()]);
        let error = batch
            .rows
            .iter()
            .find(|r| r[COL_MERGE_STATUS] == "ERROR")
            .expect("error row");
        assert_eq!(error.len(), WIDTH);
        assert_eq!(error[COL_STUDENT_ID], "222222");
        assert_eq!(error[COL_ADDITIONAL_NOTES], "synthetic failure");
        for row in &batch.rows {
            assert_eq!(row.len(), WIDTH);
        }
    }

    #[test]
    fn students_without_entry_dates_are_skipped_not_errored() {
        let sources = Sources {
            tentative: table(
                "tentative",
                json!([{ "Student ID": "111111", "LAST": "Aa", "FIRST": "A" }]),
            ),
            registrations: SourceTable::new(),
            contact_info: SourceTable::new(),
            schedules: SourceTable::new(),
            form_responses: SourceTable::new(),
            attendance: SourceTable::new(),
            entry_withdrawal: SourceTable::new(),
        };
        let roster = merge(&sources);
        let batch = build_rows(&roster, &[], &Config::default(), today());
        assert!(batch.rows.is_empty());
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].student_id, "111111");
    }

    #[test]
    fn full_row_carries_release_date_and_contact_columns() {
        let sources = Sources {
            tentative: table(
                "tentative",
                json!([{ "Student ID": "123456", "LAST": "Doe", "FIRST": "Jane",
                         "GRADE": "8", "Additional Notes": "keep me" }]),
            ),
            registrations: table(
                "registrations",
                json!([{ "Student ID": "123456", "Placement Days": 5,
                         "Home Campus": "North HS",
                         "Educational Factors": "Section 504" }]),
            ),
            contact_info: table(
                "contactInfo",
                json!([{ "Student ID": "123456", "Student Email": "j@example.org",
                         "Guardian Name": "G. Doe", "Guardian Email": "g@example.org" }]),
            ),
            schedules: SourceTable::new(),
            form_responses: SourceTable::new(),
            attendance: table(
                "attendance",
                json!([{ "Student ID": "123456",
                         "Days in Attendance": 3, "Days in Enrollment": 3 }]),
            ),
            entry_withdrawal: table(
                "entryWithdrawal",
                json!([{ "Student ID": "123456", "Entry Date": "08/11/2025" }]),
            ),
        };
        let roster = merge(&sources);
        let batch = build_rows(&roster, &[], &Config::default(), today());
        assert_eq!(batch.rows.len(), 1);
        let row = &batch.rows[0];
        assert_eq!(row[COL_STUDENT_ID], "123456");
        // 5 placement days from Mon 8/11 lands on Mon 8/18.
        assert_eq!(row[COL_ANTICIPATED_RELEASE], "08/18/2025");
        assert_eq!(row[COL_IS_504], "Yes");
        assert_eq!(row[COL_IS_ESL], "No");
        assert_eq!(row[COL_ADDITIONAL_NOTES], "keep me");
        let cols = columns();
        let idx = |name: &str| cols.iter().position(|c| c == name).expect("column");
        assert_eq!(row[idx("Home Campus")], "North HS");
        assert_eq!(row[idx("First Day of AEP")], "08/11/2025");
        assert_eq!(row[idx("Student Email")], "j@example.org");
        assert_eq!(row[idx("Guardian Email")], "g@example.org");
    }
}
