use chrono::NaiveDate;

use crate::calendar::add_workdays;
use crate::sources::{field_number, value_text, RawRow};

/// Placement days from the student's registration row, falling back to a
/// backup export matched by case-insensitive "student id" / "placement days"
/// headers. Zero and non-numeric values count as missing.
pub fn placement_days(
    registration_row: Option<&RawRow>,
    student_id: &str,
    backup_rows: &[RawRow],
) -> Option<f64> {
    if let Some(row) = registration_row {
        if let Some(days) = field_number(row, crate::sources::fields::PLACEMENT_DAYS) {
            if days > 0.0 {
                return Some(days);
            }
        }
    }
    backup_placement_days(student_id, backup_rows)
}

fn backup_placement_days(student_id: &str, backup_rows: &[RawRow]) -> Option<f64> {
    for row in backup_rows {
        let mut id_match = false;
        let mut days: Option<f64> = None;
        for (key, value) in row {
            let k = key.trim().to_ascii_lowercase();
            if k.contains("student id") && value_text(value) == student_id {
                id_match = true;
            }
            if k.contains("placement days") {
                days = match value {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
            }
        }
        if id_match {
            return days.filter(|d| *d > 0.0);
        }
    }
    None
}

/// Anticipated release date. All four inputs are required; any missing or
/// zero input yields None rather than an error. The allotment is counted in
/// attended school days, so days missed (enrollment minus attendance) extend
/// the stay.
pub fn estimate_exit_date(
    entry_date: Option<NaiveDate>,
    placement_days: Option<f64>,
    days_in_attendance: Option<f64>,
    days_in_enrollment: Option<f64>,
    holidays: &[String],
) -> Option<NaiveDate> {
    let entry = entry_date?;
    let placement = placement_days.filter(|d| *d > 0.0)?;
    let attendance = days_in_attendance.filter(|d| *d > 0.0)?;
    let enrollment = days_in_enrollment.filter(|d| *d > 0.0)?;

    let missed = (enrollment - attendance).max(0.0);
    let span = (placement + missed).round();
    if span <= 0.0 {
        return Some(entry);
    }
    Some(add_workdays(entry, span as u32, holidays))
}
