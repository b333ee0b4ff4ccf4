use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::calendar::{add_workdays, is_holiday, is_weekend};
use crate::config::Config;
use crate::merge::MergedRoster;
use crate::sources::{field_str, fields, format_mdy, format_ymd};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub run: bool,
    pub reason: String,
}

/// Scheduled reminder runs are a no-op on weekends and holidays.
pub fn should_run_today(today: NaiveDate, holidays: &[String]) -> GateDecision {
    if is_weekend(today) {
        return GateDecision {
            run: false,
            reason: "weekend".to_string(),
        };
    }
    if is_holiday(today, holidays) {
        return GateDecision {
            run: false,
            reason: "holiday".to_string(),
        };
    }
    GateDecision {
        run: true,
        reason: "school day".to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: String,
    pub last: String,
    pub first: String,
    pub grade: String,
    pub first_day: String,
}

/// Students whose milestone (first day + N workdays) falls exactly on today.
/// Comparison is by normalized date string, matching the source system.
pub fn select_milestone_students(
    roster: &MergedRoster,
    today: NaiveDate,
    holidays: &[String],
    milestone_workdays: u32,
) -> Vec<StudentSummary> {
    let today_key = format_ymd(today);
    let mut selected = Vec::new();
    for (id, record) in roster {
        let Some(first_day) = record.entry_date() else {
            warn!(student = id, "no first-day field; skipping reminder check");
            continue;
        };
        let milestone = add_workdays(first_day, milestone_workdays, holidays);
        if format_ymd(milestone) != today_key {
            continue;
        }
        let tent = record.tentative_row();
        selected.push(StudentSummary {
            student_id: id.clone(),
            last: tent.and_then(|r| field_str(r, fields::LAST)).unwrap_or_default(),
            first: tent.and_then(|r| field_str(r, fields::FIRST)).unwrap_or_default(),
            grade: tent.and_then(|r| field_str(r, fields::GRADE)).unwrap_or_default(),
            first_day: format_mdy(first_day),
        });
    }
    selected
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPayload {
    pub send: bool,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

/// Plain-text reminder body. Recipients are the static configured list no
/// matter which students matched.
pub fn build_reminder_email(
    students: &[StudentSummary],
    today: NaiveDate,
    cfg: &Config,
) -> EmailPayload {
    let body = if students.is_empty() {
        "No students reach their 10-day mark today.".to_string()
    } else {
        let due = add_workdays(today, cfg.due_date_workdays, &cfg.holidays);
        let mut lines = vec![
            "The following students reach their 10-day mark today. Please submit transition feedback for each:".to_string(),
            String::new(),
        ];
        for s in students {
            lines.push(format!(
                "{}, {} ({}), Grade: {}",
                s.last, s.first, s.student_id, s.grade
            ));
        }
        lines.push(String::new());
        lines.push(format!("Feedback is due by {}.", format_mdy(due)));
        lines.join("\n")
    };

    EmailPayload {
        send: true,
        subject: cfg.reminder_subject.clone(),
        body,
        recipients: cfg.reminder_recipients.clone(),
    }
}
