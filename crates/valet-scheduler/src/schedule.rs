use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::warn;

/// Compute the next execution instant for `expr` strictly after `from`.
///
/// Users write standard 5-field cron (`min hour dom mon dow`); the cron
/// crate wants a seconds column, so 5-field expressions are normalised by
/// prepending `0`. Returns `None` when the expression does not parse or
/// has no future occurrence; the caller treats that as "task disabled",
/// never as a reason to crash the poll loop.
pub fn next_run_after(expr: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let normalized = normalize(expr);
    let schedule = match cron::Schedule::from_str(&normalized) {
        Ok(s) => s,
        Err(e) => {
            warn!(expr, error = %e, "cron expression failed to parse; next_run cleared");
            return None;
        }
    };
    schedule.after(&from).next()
}

/// True when `expr` is a valid cron expression.
pub fn is_valid(expr: &str) -> bool {
    cron::Schedule::from_str(&normalize(expr)).is_ok()
}

fn normalize(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_nine_am_rolls_to_the_next_day_when_past() {
        // 10:00 UTC on day D: the 09:00 slot already passed.
        let from = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
        let next = next_run_after("0 9 * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn daily_nine_am_fires_same_day_when_still_ahead() {
        let from = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        let next = next_run_after("0 9 * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn successive_runs_advance_day_by_day() {
        let from = Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap();
        // Strictly after the 09:00 firing: the next slot is tomorrow.
        let next = next_run_after("0 9 * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 12, 9, 0, 0).unwrap());
    }

    #[test]
    fn every_six_hours_expression() {
        let from = Utc.with_ymd_and_hms(2026, 3, 10, 7, 30, 0).unwrap();
        let next = next_run_after("0 */6 * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap());
    }

    #[test]
    fn hourly_expression_fires_at_the_top_of_the_hour() {
        let from = Utc.with_ymd_and_hms(2026, 3, 10, 7, 30, 0).unwrap();
        let next = next_run_after("0 * * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap());
    }

    #[test]
    fn six_field_expressions_pass_through() {
        let from = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        let next = next_run_after("0 0 9 * * *", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn invalid_expressions_yield_none() {
        let from = Utc::now();
        assert!(next_run_after("not a cron", from).is_none());
        assert!(next_run_after("99 99 * * *", from).is_none());
        assert!(next_run_after("", from).is_none());
    }

    #[test]
    fn validity_check_matches_parser() {
        assert!(is_valid("0 9 * * *"));
        assert!(!is_valid("banana"));
    }
}
