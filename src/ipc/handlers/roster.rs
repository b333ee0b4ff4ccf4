use chrono::NaiveDate;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::merge::{self, MergedRoster, Sources};
use crate::rows;
use crate::snapshot;
use crate::sources::{key_rows, parse_date_str, RawRow, SourceTable};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn required_table(params: &serde_json::Value, key: &str) -> Result<SourceTable, String> {
    let rows = params
        .get("sources")
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("missing source: {}", key))?;
    Ok(key_rows(key, rows))
}

fn optional_table(params: &serde_json::Value, key: &str) -> SourceTable {
    params
        .get("sources")
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_array())
        .map(|rows| key_rows(key, rows))
        .unwrap_or_default()
}

fn optional_rows(params: &serde_json::Value, key: &str) -> Vec<RawRow> {
    params
        .get("sources")
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|v| v.as_object().cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// A structurally missing required source aborts the whole run; no partial
/// merge is returned. The error is a plain reason so the reminder path can
/// degrade to a "no email" result instead of an IPC error.
pub fn parse_sources(params: &serde_json::Value) -> Result<Sources, String> {
    Ok(Sources {
        tentative: required_table(params, "tentative")?,
        registrations: required_table(params, "registrations")?,
        contact_info: required_table(params, "contactInfo")?,
        schedules: required_table(params, "schedules")?,
        form_responses: required_table(params, "formResponses")?,
        attendance: required_table(params, "attendance")?,
        entry_withdrawal: required_table(params, "entryWithdrawal")?,
    })
}

fn merged_filtered_roster(params: &serde_json::Value) -> Result<MergedRoster, HandlerErr> {
    let sources = parse_sources(params).map_err(|message| HandlerErr {
        code: "missing_source",
        message,
        details: None,
    })?;
    let roster = merge::merge(&sources);
    let withdrawn = optional_table(params, "withdrawn");
    let other_withdrawn = optional_table(params, "otherWithdrawn");
    Ok(merge::filter_excluded(roster, &[&withdrawn, &other_withdrawn]))
}

fn today_param(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("today").and_then(|v| v.as_str()) {
        Some(s) => parse_date_str(s).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("unparseable today: {}", s),
            details: None,
        }),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn roster_merge(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let roster = merged_filtered_roster(params)?;
    let students: Vec<serde_json::Value> = roster
        .iter()
        .map(|(id, rec)| {
            json!({
                "studentId": id,
                "sections": {
                    "tentative": rec.tentative.len(),
                    "registrations": rec.registrations.len(),
                    "contactInfo": rec.contact_info.len(),
                    "schedules": rec.schedules.len(),
                    "formResponses": rec.form_responses.len(),
                    "entryWithdrawal": rec.entry_withdrawal.len(),
                    "attendance": rec.attendance.len(),
                }
            })
        })
        .collect();
    Ok(json!({
        "studentCount": roster.len(),
        "students": students,
    }))
}

fn roster_build_rows(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let roster = merged_filtered_roster(params)?;
    let backup = optional_rows(params, "backupRegistrations");
    let today = today_param(params)?;

    let batch = rows::build_rows(&roster, &backup, &state.config, today);
    let run_id = Uuid::new_v4().to_string();
    let result = json!({
        "runId": run_id,
        "columns": rows::columns(),
        "rows": batch.rows,
        "skipped": batch.skipped,
        "errorRowIds": batch.error_row_ids,
    });

    // Audit trail; never blocks the response.
    if let Some(workspace) = &state.workspace {
        if let Err(e) = snapshot::write_last_run(workspace, &result) {
            warn!(error = %e, "failed to write run snapshot");
        }
    }

    Ok(result)
}

fn handle_roster_merge(req: &Request) -> serde_json::Value {
    match roster_merge(&req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_roster_build_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    match roster_build_rows(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.merge" => Some(handle_roster_merge(req)),
        "roster.buildRows" => Some(handle_roster_build_rows(state, req)),
        _ => None,
    }
}
