use serde::Serialize;
use tracing::warn;

use crate::sources::{field, field_str, fields, parse_datetime_str, value_text, RawRow};

/// Closed set of teaching slots. Raw schedule values are numeric (1-8, 9 for
/// Special Education) or ordinal text like `"3rd"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Seventh,
    Eighth,
    SpecialEducation,
}

impl Period {
    pub const CLASS_PERIODS: [Period; 8] = [
        Period::First,
        Period::Second,
        Period::Third,
        Period::Fourth,
        Period::Fifth,
        Period::Sixth,
        Period::Seventh,
        Period::Eighth,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Period::First => "1st",
            Period::Second => "2nd",
            Period::Third => "3rd",
            Period::Fourth => "4th",
            Period::Fifth => "5th",
            Period::Sixth => "6th",
            Period::Seventh => "7th",
            Period::Eighth => "8th",
            Period::SpecialEducation => "Special Education",
        }
    }

    fn from_number(n: u64) -> Option<Period> {
        match n {
            1 => Some(Period::First),
            2 => Some(Period::Second),
            3 => Some(Period::Third),
            4 => Some(Period::Fourth),
            5 => Some(Period::Fifth),
            6 => Some(Period::Sixth),
            7 => Some(Period::Seventh),
            8 => Some(Period::Eighth),
            9 => Some(Period::SpecialEducation),
            _ => None,
        }
    }

    /// Accepts numbers and ordinal-ish strings. Unrecognized values are a
    /// parse warning at the call site, never a silent slot.
    pub fn from_raw(v: &serde_json::Value) -> Option<Period> {
        if let Some(n) = v.as_u64() {
            return Period::from_number(n);
        }
        let text = value_text(v);
        if text.is_empty() {
            return None;
        }
        if text.to_ascii_lowercase().contains("special") {
            return Some(Period::SpecialEducation);
        }
        text.chars()
            .find(|c| c.is_ascii_digit())
            .and_then(|c| c.to_digit(10))
            .and_then(|d| Period::from_number(u64::from(d)))
    }

    fn index(self) -> Option<usize> {
        Period::CLASS_PERIODS.iter().position(|p| *p == self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodInput {
    pub course_title: String,
    pub teacher_name: String,
    pub transfer_grade: String,
    pub current_grade: String,
    pub growth_assessment: String,
    pub progress_notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialEdInput {
    pub case_manager: String,
    pub accommodations: String,
    pub behavior_strengths: String,
    pub behavior_needs: String,
    pub functional_needs: String,
    pub comments: String,
}

/// Fixed per-student structure: one slot per class period plus Special
/// Education. Populated additively; layers never blank a set value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherInput {
    pub periods: [PeriodInput; 8],
    pub special_education: SpecialEdInput,
}

impl TeacherInput {
    pub fn period(&self, p: Period) -> Option<&PeriodInput> {
        p.index().map(|i| &self.periods[i])
    }

    fn period_mut(&mut self, p: Period) -> Option<&mut PeriodInput> {
        p.index().map(|i| &mut self.periods[i])
    }
}

/// Three-tier precedence: schedule owns who-teaches-what, form responses own
/// the qualitative assessment, and the legacy roster sheet only backfills
/// what previous runs or humans already entered.
pub fn reconcile(
    student_id: &str,
    form_responses: &[RawRow],
    schedule_rows: &[RawRow],
    tentative_row: Option<&RawRow>,
    case_manager_course: &str,
) -> TeacherInput {
    let mut input = TeacherInput::default();

    apply_schedule_layer(&mut input, student_id, schedule_rows, case_manager_course);
    if !form_responses.is_empty() {
        apply_form_layer(&mut input, student_id, form_responses, schedule_rows);
    }
    if let Some(legacy) = tentative_row {
        apply_legacy_layer(&mut input, legacy);
    }

    input
}

fn apply_schedule_layer(
    input: &mut TeacherInput,
    student_id: &str,
    schedule_rows: &[RawRow],
    case_manager_course: &str,
) {
    for row in schedule_rows {
        let course = field_str(row, fields::COURSE_TITLE).unwrap_or_default();
        let teacher = field_str(row, fields::TEACHER_NAME).unwrap_or_default();

        if !course.is_empty() && course.eq_ignore_ascii_case(case_manager_course) {
            if !teacher.is_empty() {
                input.special_education.case_manager = teacher.clone();
            }
        }

        let period = field(row, fields::PERIOD_BEGIN).and_then(Period::from_raw);
        let Some(period) = period else {
            let raw = field(row, fields::PERIOD_BEGIN)
                .map(value_text)
                .unwrap_or_default();
            warn!(student = student_id, value = %raw, "unrecognized schedule period");
            continue;
        };
        if let Some(slot) = input.period_mut(period) {
            if !course.is_empty() {
                slot.course_title = course;
            }
            if !teacher.is_empty() {
                slot.teacher_name = teacher;
            }
        }
    }
}

/// Keep only the most recent response per teacher. Timestamp candidates are
/// checked in order; when no response in a group carries one, the last array
/// element stands in for "most recent" (submission order is not a guarantee
/// every backend keeps, hence the louder warning).
fn dedupe_latest_by_teacher(responses: &[RawRow]) -> Vec<RawRow> {
    let mut order: Vec<String> = Vec::new();
    let mut best: std::collections::HashMap<String, (Option<chrono::NaiveDateTime>, usize)> =
        std::collections::HashMap::new();

    for (idx, row) in responses.iter().enumerate() {
        let teacher = field_str(row, fields::TEACHER_NAME)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let ts = field_str(row, fields::TIMESTAMP).and_then(|s| parse_datetime_str(&s));
        match best.get(&teacher) {
            None => {
                order.push(teacher.clone());
                best.insert(teacher, (ts, idx));
            }
            Some((cur_ts, cur_idx)) => {
                let newer = match (ts, cur_ts) {
                    (Some(a), Some(b)) => a > *b || (a == *b && idx > *cur_idx),
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    (None, None) => {
                        warn!(
                            teacher = %teacher,
                            "duplicate responses with no timestamp; keeping last element"
                        );
                        idx > *cur_idx
                    }
                };
                if newer {
                    best.insert(teacher, (ts, idx));
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|t| best.get(&t).map(|(_, idx)| responses[*idx].clone()))
        .collect()
}

fn apply_form_layer(
    input: &mut TeacherInput,
    student_id: &str,
    form_responses: &[RawRow],
    schedule_rows: &[RawRow],
) {
    for response in dedupe_latest_by_teacher(form_responses) {
        let teacher = field_str(&response, fields::TEACHER_NAME).unwrap_or_default();

        let matched_period = schedule_rows.iter().find_map(|row| {
            let sched_teacher = field_str(row, fields::TEACHER_NAME)?;
            if sched_teacher.trim().eq_ignore_ascii_case(teacher.trim()) {
                field(row, fields::PERIOD_BEGIN).and_then(Period::from_raw)
            } else {
                None
            }
        });

        if let Some(slot) = matched_period.and_then(|p| input.period_mut(p)) {
            // Course/teacher stay schedule-authoritative; the form only
            // contributes the assessment fields.
            if let Some(growth) = field_str(&response, fields::GROWTH_ASSESSMENT) {
                slot.growth_assessment = growth;
            }
            if let Some(notes) = field_str(&response, fields::PROGRESS_NOTES) {
                slot.progress_notes = notes;
            }
            continue;
        }

        if looks_like_case_manager(&response, &teacher) {
            apply_case_manager_response(&mut input.special_education, &response, &teacher);
        } else {
            warn!(
                student = student_id,
                teacher = %teacher,
                "form response matches no schedule row; skipped"
            );
        }
    }
}

fn looks_like_case_manager(response: &RawRow, teacher: &str) -> bool {
    field(response, fields::CASE_MANAGER).is_some()
        || teacher.to_ascii_lowercase().contains("case manager")
}

fn apply_case_manager_response(sped: &mut SpecialEdInput, response: &RawRow, teacher: &str) {
    let manager = field_str(response, fields::CASE_MANAGER)
        .unwrap_or_else(|| teacher.to_string());
    if !manager.is_empty() {
        sped.case_manager = manager;
    }
    if let Some(v) = field_str(response, fields::ACCOMMODATIONS) {
        sped.accommodations = v;
    }
    if let Some(v) = field_str(response, fields::BEHAVIOR_STRENGTHS) {
        sped.behavior_strengths = v;
    }
    if let Some(v) = field_str(response, fields::BEHAVIOR_NEEDS) {
        sped.behavior_needs = v;
    }
    if let Some(v) = field_str(response, fields::FUNCTIONAL_NEEDS) {
        sped.functional_needs = v;
    }
    if let Some(v) = field_str(response, fields::COMMENTS) {
        sped.comments = v;
    }
}

fn legacy_value(legacy: &RawRow, key: &str) -> Option<String> {
    legacy
        .iter()
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
        .map(|(_, v)| value_text(v))
        .filter(|t| !t.is_empty())
}

fn apply_legacy_layer(input: &mut TeacherInput, legacy: &RawRow) {
    for period in Period::CLASS_PERIODS {
        let label = period.label();
        let Some(slot) = input.period_mut(period) else {
            continue;
        };

        // Identity fields: previously exported/human-edited values survive
        // re-runs, so a non-empty legacy value replaces the schedule's.
        if let Some(v) = legacy_value(legacy, &format!("{label} Period - Course Title")) {
            slot.course_title = v;
        }
        if let Some(v) = legacy_value(legacy, &format!("{label} Period - Teacher Name")) {
            slot.teacher_name = v;
        }
        if let Some(v) = legacy_value(legacy, &format!("{label} Period - Transfer Grade")) {
            slot.transfer_grade = v;
        }
        if let Some(v) = legacy_value(legacy, &format!("{label} Period - Current Grade")) {
            slot.current_grade = v;
        }

        // Assessment fields: legacy never clobbers fresher form input.
        if slot.growth_assessment.is_empty() {
            if let Some(v) = legacy_value(legacy, &format!("{label} Period - Growth Assessment")) {
                slot.growth_assessment = v;
            }
        }
        if slot.progress_notes.is_empty() {
            if let Some(v) = legacy_value(legacy, &format!("{label} Period - Progress Notes")) {
                slot.progress_notes = v;
            }
        }
    }

    let sped = &mut input.special_education;
    for (target, key) in [
        (&mut sped.case_manager, "Special Education - Case Manager"),
        (&mut sped.accommodations, "Special Education - Accommodations"),
        (
            &mut sped.behavior_strengths,
            "Special Education - Behavior Strengths",
        ),
        (&mut sped.behavior_needs, "Special Education - Behavior Needs"),
        (
            &mut sped.functional_needs,
            "Special Education - Functional Needs",
        ),
        (&mut sped.comments, "Special Education - Comments"),
    ] {
        if target.is_empty() {
            if let Some(v) = legacy_value(legacy, key) {
                *target = v;
            }
        }
    }
}
