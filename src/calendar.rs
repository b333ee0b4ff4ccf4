use chrono::{Datelike, NaiveDate, Weekday};

use crate::sources::format_ymd;

pub fn is_weekend(d: NaiveDate) -> bool {
    matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Holidays are configured as `YYYY-MM-DD` strings and compared as such.
pub fn is_holiday(d: NaiveDate, holidays: &[String]) -> bool {
    let key = format_ymd(d);
    holidays.iter().any(|h| h.trim() == key)
}

pub fn is_school_day(d: NaiveDate, holidays: &[String]) -> bool {
    !is_weekend(d) && !is_holiday(d, holidays)
}

/// Advance by calendar days, counting only non-weekend non-holiday days
/// toward `n`.
pub fn add_workdays(start: NaiveDate, n: u32, holidays: &[String]) -> NaiveDate {
    let mut d = start;
    let mut remaining = n;
    while remaining > 0 {
        let Some(next) = d.succ_opt() else {
            return d;
        };
        d = next;
        if is_school_day(d, holidays) {
            remaining -= 1;
        }
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    #[test]
    fn weekends_are_detected() {
        assert!(is_weekend(d(2025, 8, 16))); // Saturday
        assert!(is_weekend(d(2025, 8, 17))); // Sunday
        assert!(!is_weekend(d(2025, 8, 18))); // Monday
    }

    #[test]
    fn holidays_match_on_ymd_strings() {
        let holidays = vec!["2025-09-01".to_string()];
        assert!(is_holiday(d(2025, 9, 1), &holidays));
        assert!(!is_holiday(d(2025, 9, 2), &holidays));
    }

    #[test]
    fn ten_workdays_from_a_monday() {
        // Mon 8/11 + 10 school days lands on Mon 8/25, skipping two weekends.
        assert_eq!(add_workdays(d(2025, 8, 11), 10, &[]), d(2025, 8, 25));
    }

    #[test]
    fn workday_walk_skips_holidays() {
        let holidays = vec!["2025-08-12".to_string()];
        assert_eq!(add_workdays(d(2025, 8, 11), 1, &holidays), d(2025, 8, 13));
    }

    #[test]
    fn zero_workdays_is_identity() {
        assert_eq!(add_workdays(d(2025, 8, 16), 0, &[]), d(2025, 8, 16));
    }
}
