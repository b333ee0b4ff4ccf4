use chrono::NaiveDate;
use tracing::warn;

use crate::sources::{field, field_str, fields, parse_date_value, RawRow};

/// A schedule row is active iff its withdrawal-date field is blank or absent.
/// Row order is preserved, so filtering twice is a no-op.
pub fn filter_active(rows: &[RawRow]) -> Vec<RawRow> {
    rows.iter()
        .filter(|r| field_str(r, fields::WITHDRAWAL_DATE).is_none())
        .cloned()
        .collect()
}

/// Latest parseable course-entry date among active rows. Unparseable dates
/// are logged and skipped.
pub fn most_recent_entry_date(active_rows: &[RawRow]) -> Option<NaiveDate> {
    let mut latest: Option<NaiveDate> = None;
    for row in active_rows {
        let Some(v) = field(row, fields::ENTRY_DATE) else {
            continue;
        };
        match parse_date_value(v) {
            Some(d) => {
                if latest.map(|cur| d > cur).unwrap_or(true) {
                    latest = Some(d);
                }
            }
            None => {
                let text = crate::sources::value_text(v);
                if !text.is_empty() {
                    warn!(value = %text, "unparseable schedule entry date");
                }
            }
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: serde_json::Value) -> Vec<RawRow> {
        v.as_array()
            .expect("array")
            .iter()
            .map(|r| r.as_object().expect("object").clone())
            .collect()
    }

    #[test]
    fn withdrawn_rows_are_excluded() {
        let input = rows(json!([
            { "Course Title": "Algebra", "Withdrawal Date": "08/15/2025" },
            { "Course Title": "English", "Withdrawal Date": "" },
            { "Course Title": "History" }
        ]));
        let active = filter_active(&input);
        assert_eq!(active.len(), 2);
        assert_eq!(
            field_str(&active[0], fields::COURSE_TITLE).as_deref(),
            Some("English")
        );
        // Idempotent: filtering again changes nothing.
        assert_eq!(filter_active(&active), active);
    }

    #[test]
    fn most_recent_entry_date_takes_the_max() {
        let input = rows(json!([
            { "Entry Date": "08/11/2025" },
            { "Entry Date": "09/02/2025" },
            { "Entry Date": "08/20/2025" }
        ]));
        assert_eq!(
            most_recent_entry_date(&input),
            NaiveDate::from_ymd_opt(2025, 9, 2)
        );
    }

    #[test]
    fn invalid_dates_are_skipped_not_fatal() {
        let input = rows(json!([
            { "Entry Date": "garbage" },
            { "Entry Date": "08/11/2025" }
        ]));
        assert_eq!(
            most_recent_entry_date(&input),
            NaiveDate::from_ymd_opt(2025, 8, 11)
        );
        assert_eq!(most_recent_entry_date(&rows(json!([{ "Entry Date": "x" }]))), None);
    }
}
