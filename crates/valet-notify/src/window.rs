//! Pure time-window checks, separated from the notifier for testability.

use std::time::{Duration, Instant};

/// Sliding-window length for the per-user rate limit.
pub(crate) const RATE_WINDOW: Duration = Duration::from_secs(3600);

/// Whether `current_minutes` (minutes since UTC midnight) falls inside the
/// quiet-hours window. Windows where start > end wrap midnight
/// (e.g. 23:00-07:00). Malformed times never block a message.
pub fn is_quiet_hours(start: &str, end: &str, current_minutes: u32) -> bool {
    let (Some(start_min), Some(end_min)) = (parse_hhmm(start), parse_hhmm(end)) else {
        return false;
    };
    if start_min <= end_min {
        // Same-day range (e.g. 09:00-17:00).
        start_min <= current_minutes && current_minutes < end_min
    } else {
        // Overnight range (e.g. 23:00-07:00).
        current_minutes >= start_min || current_minutes < end_min
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Prune timestamps older than one hour, then report whether another send
/// fits under `max`.
pub(crate) fn within_rate_limit(
    timestamps: &mut Vec<Instant>,
    now: Instant,
    max: usize,
) -> bool {
    timestamps.retain(|t| now.duration_since(*t) < RATE_WINDOW);
    timestamps.len() < max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_day_window_blocks_inside_only() {
        // 09:00-17:00
        assert!(is_quiet_hours("09:00", "17:00", 10 * 60));
        assert!(!is_quiet_hours("09:00", "17:00", 8 * 60));
        assert!(!is_quiet_hours("09:00", "17:00", 17 * 60));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        // 23:00-07:00
        assert!(is_quiet_hours("23:00", "07:00", 2 * 60)); // 02:00
        assert!(is_quiet_hours("23:00", "07:00", 23 * 60 + 30)); // 23:30
        assert!(!is_quiet_hours("23:00", "07:00", 12 * 60)); // noon
        assert!(!is_quiet_hours("23:00", "07:00", 7 * 60)); // exactly 07:00
    }

    #[test]
    fn malformed_times_never_block() {
        assert!(!is_quiet_hours("25:00", "07:00", 120));
        assert!(!is_quiet_hours("nope", "07:00", 120));
        assert!(!is_quiet_hours("23:00", "", 120));
    }

    #[test]
    fn rate_limit_counts_only_the_trailing_hour() {
        // Base the window on a shifted "now" so old timestamps can be
        // constructed without underflowing the monotonic clock.
        let now = Instant::now() + Duration::from_secs(7200);
        let old = now - Duration::from_secs(3700);
        let recent = now - Duration::from_secs(60);
        let mut stamps = vec![old, old, recent];
        assert!(within_rate_limit(&mut stamps, now, 2));
        // Old entries were pruned.
        assert_eq!(stamps.len(), 1);
    }

    #[test]
    fn rate_limit_blocks_at_the_cap() {
        let now = Instant::now() + Duration::from_secs(7200);
        let mut stamps = vec![now - Duration::from_secs(1); 10];
        assert!(!within_rate_limit(&mut stamps, now, 10));
        assert!(within_rate_limit(&mut stamps, now, 11));
    }
}
