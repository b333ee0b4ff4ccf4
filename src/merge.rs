use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::schedule;
use crate::sources::{
    field_str, fields, format_mdy, parse_date_str, set_field, RawRow, SourceTable,
};

/// The seven loader outputs the merge consumes. Each is already keyed by
/// student id; a structurally missing source is rejected before this struct
/// is built (see the roster handler).
pub struct Sources {
    pub tentative: SourceTable,
    pub registrations: SourceTable,
    pub contact_info: SourceTable,
    pub schedules: SourceTable,
    pub form_responses: SourceTable,
    pub attendance: SourceTable,
    pub entry_withdrawal: SourceTable,
}

/// One student's merged record. Every section exists after merge, possibly
/// empty; consumers may rely on presence but never on population.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedStudent {
    pub tentative: Vec<RawRow>,
    pub registrations: Vec<RawRow>,
    pub contact_info: Vec<RawRow>,
    pub schedules: Vec<RawRow>,
    pub form_responses: Vec<RawRow>,
    pub entry_withdrawal: Vec<RawRow>,
    pub attendance: Vec<RawRow>,
}

impl MergedStudent {
    pub fn tentative_row(&self) -> Option<&RawRow> {
        self.tentative.first()
    }

    /// On-file program entry date: entry/withdrawal first, then the roster
    /// sheet's first-day column.
    pub fn entry_date(&self) -> Option<chrono::NaiveDate> {
        for row in &self.entry_withdrawal {
            if let Some(d) = field_str(row, fields::ENTRY_DATE).and_then(|s| parse_date_str(&s)) {
                return Some(d);
            }
        }
        self.tentative_row()
            .and_then(|r| field_str(r, fields::FIRST_DAY))
            .and_then(|s| parse_date_str(&s))
    }
}

pub type MergedRoster = BTreeMap<String, MergedStudent>;

pub fn merge(sources: &Sources) -> MergedRoster {
    let base = if !sources.tentative.is_empty() {
        &sources.tentative
    } else if !sources.entry_withdrawal.is_empty() {
        debug!("primary roster empty; building base map from entry/withdrawal");
        &sources.entry_withdrawal
    } else {
        debug!("primary roster and entry/withdrawal empty; falling back to registrations");
        &sources.registrations
    };

    let mut roster = MergedRoster::new();
    for (id, base_rows) in base {
        let mut record = MergedStudent::default();

        let mut canonical = base_rows.first().cloned().unwrap_or_default();
        recover_identity(
            &mut canonical,
            id,
            sources.entry_withdrawal.get(id).map(Vec::as_slice).unwrap_or(&[]),
            sources.registrations.get(id).map(Vec::as_slice).unwrap_or(&[]),
        );
        record.tentative.push(canonical);
        record.tentative.extend(base_rows.iter().skip(1).cloned());

        record.registrations = section(&sources.registrations, id);
        record.contact_info = section(&sources.contact_info, id);
        record.form_responses = section(&sources.form_responses, id);
        record.attendance = section(&sources.attendance, id);
        record.entry_withdrawal = section(&sources.entry_withdrawal, id);

        // Schedule merge runs last so its entry-date correction lands on the
        // already-attached entry/withdrawal rows.
        let raw_schedules = section(&sources.schedules, id);
        record.schedules = schedule::filter_active(&raw_schedules);
        propagate_schedule_entry_date(id, &mut record);

        roster.insert(id.clone(), record);
    }

    info!(students = roster.len(), "merge complete");
    roster
}

fn section(table: &SourceTable, id: &str) -> Vec<RawRow> {
    table.get(id).cloned().unwrap_or_default()
}

/// Students who transfer between in-roster course assignments get their
/// first-day field corrected to the most recent active enrollment.
fn propagate_schedule_entry_date(id: &str, record: &mut MergedStudent) {
    let Some(latest) = schedule::most_recent_entry_date(&record.schedules) else {
        return;
    };
    let on_file = record.entry_date();
    if on_file.map(|d| latest > d).unwrap_or(true) {
        let text = format_mdy(latest);
        if let Some(tent) = record.tentative.first_mut() {
            set_field(tent, fields::FIRST_DAY, "First Day of AEP", &text);
        }
        if let Some(ew) = record.entry_withdrawal.first_mut() {
            set_field(ew, fields::ENTRY_DATE, "Entry Date", &text);
        }
        debug!(student = id, date = %text, "entry date corrected from active schedule");
    }
}

/// Best-effort recovery of blank identity columns. All sources may lack a
/// name; the student is still included.
fn recover_identity(canonical: &mut RawRow, id: &str, ew: &[RawRow], reg: &[RawRow]) {
    set_field(canonical, fields::STUDENT_ID, "Student ID", id);

    let has_first = field_str(canonical, fields::FIRST).is_some();
    let has_last = field_str(canonical, fields::LAST).is_some();
    if !has_first || !has_last {
        if let Some((last, first)) = recover_name(ew, reg) {
            if !has_last && !last.is_empty() {
                set_field(canonical, fields::LAST, "LAST", &last);
            }
            if !has_first && !first.is_empty() {
                set_field(canonical, fields::FIRST, "FIRST", &first);
            }
        }
    }

    if field_str(canonical, fields::GRADE).is_none() {
        let grade = ew
            .iter()
            .find_map(|r| field_str(r, fields::GRADE))
            .or_else(|| reg.iter().find_map(|r| field_str(r, fields::GRADE)));
        if let Some(g) = grade {
            set_field(canonical, fields::GRADE, "GRADE", &g);
        }
    }
}

fn recover_name(ew: &[RawRow], reg: &[RawRow]) -> Option<(String, String)> {
    // (a) entry/withdrawal explicit name columns
    for row in ew {
        let first = field_str(row, fields::FIRST);
        let last = field_str(row, fields::LAST);
        if first.is_some() || last.is_some() {
            return Some((last.unwrap_or_default(), first.unwrap_or_default()));
        }
    }
    // (b) entry/withdrawal combined "Last, First"
    for row in ew {
        if let Some(combined) = field_str(row, fields::NAME_COMBINED) {
            if let Some((last, first)) = combined.split_once(',') {
                return Some((last.trim().to_string(), first.trim().to_string()));
            }
        }
    }
    // (c) registrations name columns
    for row in reg {
        let first = field_str(row, fields::FIRST);
        let last = field_str(row, fields::LAST);
        if first.is_some() || last.is_some() {
            return Some((last.unwrap_or_default(), first.unwrap_or_default()));
        }
    }
    None
}

/// Drop students present in any withdrawal-exception source. Membership is
/// by id only; the exclusion rows' content is irrelevant.
pub fn filter_excluded(mut roster: MergedRoster, exclusions: &[&SourceTable]) -> MergedRoster {
    roster.retain(|id, _| {
        let excluded = exclusions.iter().any(|t| t.contains_key(id));
        if excluded {
            debug!(student = id, "excluded by withdrawal list");
        }
        !excluded
    });
    roster
}
