use chrono::NaiveDate;
use serde_json::json;
use tracing::warn;

use crate::ipc::error::{err, ok};
use crate::ipc::handlers::roster::parse_sources;
use crate::ipc::types::{AppState, Request};
use crate::merge;
use crate::remind;
use crate::sources::parse_date_str;

fn today_param(params: &serde_json::Value) -> Result<NaiveDate, String> {
    match params.get("today").and_then(|v| v.as_str()) {
        Some(s) => parse_date_str(s).ok_or_else(|| format!("unparseable today: {}", s)),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn handle_should_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let today = match today_param(&req.params) {
        Ok(t) => t,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };
    let gate = remind::should_run_today(today, &state.config.holidays);
    ok(&req.id, json!(gate))
}

/// The scheduled reminder job must never crash: a failed data load or a
/// closed calendar day comes back as a "do not send" result with a reason.
fn handle_ten_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let today = match today_param(&req.params) {
        Ok(t) => t,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };

    let gate = remind::should_run_today(today, &state.config.holidays);
    if !gate.run {
        return ok(
            &req.id,
            json!({ "run": false, "send": false, "reason": gate.reason, "students": [] }),
        );
    }

    let sources = match parse_sources(&req.params) {
        Ok(s) => s,
        Err(reason) => {
            warn!(%reason, "reminder run aborted: data load failed");
            return ok(
                &req.id,
                json!({ "run": false, "send": false, "reason": reason, "students": [] }),
            );
        }
    };

    // Reminders read the merged roster directly; the withdrawal-exception
    // filter only applies to the output sheet.
    let roster = merge::merge(&sources);
    let students = remind::select_milestone_students(
        &roster,
        today,
        &state.config.holidays,
        state.config.milestone_workdays,
    );
    let payload = remind::build_reminder_email(&students, today, &state.config);

    ok(
        &req.id,
        json!({
            "run": true,
            "send": payload.send,
            "subject": payload.subject,
            "body": payload.body,
            "recipients": payload.recipients,
            "students": students,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reminders.shouldRun" => Some(handle_should_run(state, req)),
        "reminders.tenDay" => Some(handle_ten_day(state, req)),
        _ => None,
    }
}
