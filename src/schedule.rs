use crate::types::{PipelineConfig, ScheduleKind};
use chrono::{DateTime, Duration, NaiveTime, Utc};

/// The instant on `now`'s calendar day at which a delivery targeting
/// `delivery_time` should start running: the target time minus the lead time,
/// so content is ready when the delivery is supposed to land.
pub fn run_instant(now: DateTime<Utc>, delivery_time: NaiveTime, lead_time: Duration) -> DateTime<Utc> {
    now.date_naive().and_time(delivery_time).and_utc() - lead_time
}

/// Decide whether a pipeline is due at `now`. All reasoning is in UTC.
///
/// A pipeline with no prior delivery is always due. Otherwise two conditions
/// must both hold: the recurrence interval for its schedule kind has elapsed
/// since the last delivery, and `now` has reached today's run instant.
pub fn is_due(
    schedule: ScheduleKind,
    delivery_time: NaiveTime,
    last_delivered: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lead_time: Duration,
) -> bool {
    if schedule == ScheduleKind::Unknown {
        return false;
    }

    let last = match last_delivered {
        Some(last) => last,
        None => return true,
    };

    let interval_elapsed = match schedule {
        ScheduleKind::Daily => last.date_naive() < now.date_naive(),
        ScheduleKind::Weekly => last <= now - Duration::days(7),
        ScheduleKind::Monthly => last <= now - Duration::days(30),
        ScheduleKind::Unknown => false,
    };

    interval_elapsed && now >= run_instant(now, delivery_time, lead_time)
}

/// Convenience form over a stored config.
pub fn pipeline_is_due(config: &PipelineConfig, now: DateTime<Utc>, lead_time: Duration) -> bool {
    is_due(
        config.schedule,
        config.delivery_time,
        config.last_delivered,
        now,
        lead_time,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn nine_am() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn never_delivered_is_always_due() {
        let now = at(2025, 3, 10, 0, 1);
        assert!(is_due(
            ScheduleKind::Daily,
            nine_am(),
            None,
            now,
            Duration::minutes(30)
        ));
        assert!(is_due(
            ScheduleKind::Monthly,
            nine_am(),
            None,
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn daily_not_due_again_same_day() {
        let last = at(2025, 3, 10, 8, 31);
        let now = at(2025, 3, 10, 23, 59);
        assert!(!is_due(
            ScheduleKind::Daily,
            nine_am(),
            Some(last),
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn daily_due_one_minute_after_run_instant() {
        // Target 09:00 with a 30 minute lead puts the run instant at 08:30.
        let last = at(2025, 3, 9, 8, 31);
        let now = at(2025, 3, 10, 8, 31);
        assert!(is_due(
            ScheduleKind::Daily,
            nine_am(),
            Some(last),
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn daily_not_due_before_run_instant() {
        let last = at(2025, 3, 9, 8, 31);
        let now = at(2025, 3, 10, 8, 29);
        assert!(!is_due(
            ScheduleKind::Daily,
            nine_am(),
            Some(last),
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn daily_due_exactly_at_run_instant() {
        let last = at(2025, 3, 9, 12, 0);
        let now = at(2025, 3, 10, 8, 30);
        assert!(is_due(
            ScheduleKind::Daily,
            nine_am(),
            Some(last),
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn weekly_not_due_inside_seven_days() {
        let last = at(2025, 3, 5, 9, 0);
        let now = at(2025, 3, 10, 10, 0);
        assert!(!is_due(
            ScheduleKind::Weekly,
            nine_am(),
            Some(last),
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn weekly_due_after_seven_days() {
        let last = at(2025, 3, 3, 8, 30);
        let now = at(2025, 3, 10, 9, 0);
        assert!(is_due(
            ScheduleKind::Weekly,
            nine_am(),
            Some(last),
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn monthly_uses_thirty_day_interval() {
        let last = at(2025, 2, 10, 9, 0);
        let not_yet = at(2025, 3, 11, 9, 0);
        assert!(!is_due(
            ScheduleKind::Monthly,
            nine_am(),
            Some(last),
            not_yet,
            Duration::minutes(30)
        ));

        let later = at(2025, 3, 12, 9, 30);
        assert!(is_due(
            ScheduleKind::Monthly,
            nine_am(),
            Some(last),
            later,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn unknown_schedule_is_never_due() {
        let last = at(2025, 1, 1, 0, 0);
        let now = at(2025, 6, 1, 12, 0);
        assert!(!is_due(
            ScheduleKind::Unknown,
            nine_am(),
            Some(last),
            now,
            Duration::minutes(30)
        ));
        // Not even without a prior delivery.
        assert!(!is_due(
            ScheduleKind::Unknown,
            nine_am(),
            None,
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn lead_time_can_cross_midnight_backwards() {
        // Target 00:10 with a 30 minute lead puts the run instant at 23:40 of
        // the previous day, so any time today is past it.
        let target = NaiveTime::from_hms_opt(0, 10, 0).unwrap();
        let last = at(2025, 3, 9, 0, 5);
        let now = at(2025, 3, 10, 0, 0);
        assert!(is_due(
            ScheduleKind::Daily,
            target,
            Some(last),
            now,
            Duration::minutes(30)
        ));
    }

    #[test]
    fn zero_lead_time_waits_for_target() {
        let last = at(2025, 3, 9, 9, 0);
        let before = at(2025, 3, 10, 8, 59);
        let after = at(2025, 3, 10, 9, 0);
        assert!(!is_due(
            ScheduleKind::Daily,
            nine_am(),
            Some(last),
            before,
            Duration::zero()
        ));
        assert!(is_due(
            ScheduleKind::Daily,
            nine_am(),
            Some(last),
            after,
            Duration::zero()
        ));
    }
}
