use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use herald_core::config::ZoneMode;

use crate::error::{Result, SchedulerError};
use crate::types::RecurrenceKind;

/// Upper bound for `interval` values (ten years).
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 3600;

/// A parsed recurrence descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Once(OnceAt),
    /// Every day at a wall-clock time.
    Daily { time: NaiveTime },
    /// Every week on `weekday` at a wall-clock time.
    Weekly { weekday: Weekday, time: NaiveTime },
    /// `every_secs` after the previous fire (or after creation).
    Interval { every_secs: u64 },
}

/// The instant of a `once` schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnceAt {
    /// Zone-qualified: RFC 3339 or epoch milliseconds.
    Instant(DateTime<Utc>),
    /// Bare `YYYY-MM-DDTHH:MM[:SS]`, read in the scheduler's zone.
    Wall(NaiveDateTime),
}

impl Recurrence {
    /// Parse `value` according to `kind`. Malformed values are rejected.
    pub fn parse(kind: RecurrenceKind, value: &str) -> Result<Self> {
        let value = value.trim();
        match kind {
            RecurrenceKind::Once => parse_once(value).map(Recurrence::Once),
            RecurrenceKind::Daily => Ok(Recurrence::Daily {
                time: parse_hh_mm(value)?,
            }),
            RecurrenceKind::Weekly => {
                let (day, time) = value.split_once(':').ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!(
                        "weekly value must be DAY:HH:MM, got {value:?}"
                    ))
                })?;
                Ok(Recurrence::Weekly {
                    weekday: parse_weekday(day)?,
                    time: parse_hh_mm(time)?,
                })
            }
            RecurrenceKind::Interval => {
                let every_secs: u64 = value.parse().map_err(|_| {
                    SchedulerError::InvalidSchedule(format!(
                        "interval must be a whole number of seconds, got {value:?}"
                    ))
                })?;
                if every_secs == 0 || every_secs > MAX_INTERVAL_SECS {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "interval must be between 1 and {MAX_INTERVAL_SECS} seconds"
                    )));
                }
                Ok(Recurrence::Interval { every_secs })
            }
        }
    }

    pub fn kind(&self) -> RecurrenceKind {
        match self {
            Recurrence::Once(_) => RecurrenceKind::Once,
            Recurrence::Daily { .. } => RecurrenceKind::Daily,
            Recurrence::Weekly { .. } => RecurrenceKind::Weekly,
            Recurrence::Interval { .. } => RecurrenceKind::Interval,
        }
    }

    /// Next fire time as seen from `now`, in `now`'s zone.
    ///
    /// `once` returns its instant verbatim even when it is in the past;
    /// `daily` and `weekly` never return a value `<= now`.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Utc> {
        let tz = now.timezone();
        match self {
            Recurrence::Once(OnceAt::Instant(at)) => *at,
            Recurrence::Once(OnceAt::Wall(naive)) => resolve_wall(&tz, *naive).with_timezone(&Utc),

            Recurrence::Interval { every_secs } => {
                now.with_timezone(&Utc) + Duration::seconds(*every_secs as i64)
            }

            Recurrence::Daily { time } => {
                let today = now.date_naive();
                let candidate = resolve_wall(&tz, today.and_time(*time));
                if candidate > *now {
                    candidate.with_timezone(&Utc)
                } else {
                    // Slot passed: tomorrow at the same wall-clock time.
                    resolve_wall(&tz, next_day(today).and_time(*time)).with_timezone(&Utc)
                }
            }

            Recurrence::Weekly { weekday, time } => {
                let today = now.date_naive();
                let days_ahead = (weekday.num_days_from_monday() as i64
                    - today.weekday().num_days_from_monday() as i64)
                    .rem_euclid(7);
                let day = today + Duration::days(days_ahead);
                let candidate = resolve_wall(&tz, day.and_time(*time));
                if candidate > *now {
                    candidate.with_timezone(&Utc)
                } else {
                    // Only reachable when today is the target day and the time has passed.
                    resolve_wall(&tz, (day + Duration::days(7)).and_time(*time))
                        .with_timezone(&Utc)
                }
            }
        }
    }
}

/// Next fire time in epoch ms, with wall-clock kinds read in `zone`.
pub fn next_fire_ms(recurrence: &Recurrence, now_ms: i64, zone: ZoneMode) -> Result<i64> {
    let now = Utc.timestamp_millis_opt(now_ms).single().ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!("timestamp out of range: {now_ms}"))
    })?;
    let next = match zone {
        ZoneMode::Utc => recurrence.next_after(&now),
        ZoneMode::Local => recurrence.next_after(&now.with_timezone(&chrono::Local)),
    };
    Ok(next.timestamp_millis())
}

/// Parse-and-compute in one step: `(kind, value, now) -> next fire time`.
pub fn next_fire_time(kind: &str, value: &str, now_ms: i64, zone: ZoneMode) -> Result<i64> {
    let kind: RecurrenceKind = kind.parse()?;
    next_fire_ms(&Recurrence::parse(kind, value)?, now_ms, zone)
}

fn parse_once(value: &str) -> Result<OnceAt> {
    if let Ok(ms) = value.parse::<i64>() {
        return Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(OnceAt::Instant)
            .ok_or_else(|| SchedulerError::InvalidSchedule(format!("timestamp out of range: {ms}")));
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(OnceAt::Instant(at.with_timezone(&Utc)));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(OnceAt::Wall(naive));
        }
    }
    Err(SchedulerError::InvalidSchedule(format!(
        "once value must be a timestamp, got {value:?}"
    )))
}

fn parse_hh_mm(value: &str) -> Result<NaiveTime> {
    let invalid = || SchedulerError::InvalidSchedule(format!("expected HH:MM, got {value:?}"));
    let (h, m) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

fn parse_weekday(day: &str) -> Result<Weekday> {
    match day.trim().to_ascii_uppercase().as_str() {
        "SUN" => Ok(Weekday::Sun),
        "MON" => Ok(Weekday::Mon),
        "TUE" => Ok(Weekday::Tue),
        "WED" => Ok(Weekday::Wed),
        "THU" => Ok(Weekday::Thu),
        "FRI" => Ok(Weekday::Fri),
        "SAT" => Ok(Weekday::Sat),
        other => Err(SchedulerError::InvalidSchedule(format!(
            "unknown weekday {other:?} (expected SUN..SAT)"
        ))),
    }
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date + Duration::days(1)
}

/// Map a wall-clock time to an instant in `tz`.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap move forward one hour.
fn resolve_wall<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(&shifted))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    /// 2026-03-04 is a Wednesday.
    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, h, m, 0).unwrap()
    }

    fn next(kind: RecurrenceKind, value: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        Recurrence::parse(kind, value).unwrap().next_after(&now)
    }

    #[test]
    fn once_returns_instant_even_in_past() {
        let now = at(12, 0);
        let past = next(RecurrenceKind::Once, "2026-01-01T08:00:00Z", now);
        assert_eq!(past, Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap());

        let ms = next(RecurrenceKind::Once, "1767254400000", now);
        assert_eq!(ms.timestamp_millis(), 1_767_254_400_000);

        let wall = next(RecurrenceKind::Once, "2026-03-05T09:30", now);
        assert_eq!(wall, Utc.with_ymd_and_hms(2026, 3, 5, 9, 30, 0).unwrap());
    }

    #[test]
    fn daily_later_today() {
        assert_eq!(next(RecurrenceKind::Daily, "18:15", at(12, 0)), at(18, 15));
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_passed_or_equal() {
        let tomorrow_9 = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();
        assert_eq!(next(RecurrenceKind::Daily, "09:00", at(12, 0)), tomorrow_9);
        assert_eq!(next(RecurrenceKind::Daily, "09:00", at(9, 0)), tomorrow_9);
    }

    #[test]
    fn daily_never_at_or_before_now() {
        let now = at(0, 0);
        for minute_of_day in (0..24 * 60).step_by(7) {
            let value = format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60);
            for offset in [0, 1, 59, 61, 720, 1439] {
                let n = now + Duration::minutes(offset);
                assert!(next(RecurrenceKind::Daily, &value, n) > n, "{value} at {n}");
            }
        }
    }

    #[test]
    fn weekly_same_day_passed_is_exactly_seven_days_later() {
        let got = next(RecurrenceKind::Weekly, "WED:09:00", at(12, 0));
        assert_eq!(got, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekly_same_day_not_yet_passed_is_today() {
        assert_eq!(next(RecurrenceKind::Weekly, "wed:18:00", at(12, 0)), at(18, 0));
    }

    #[test]
    fn weekly_other_days_within_a_week() {
        let fri = next(RecurrenceKind::Weekly, "FRI:08:00", at(12, 0));
        assert_eq!(fri, Utc.with_ymd_and_hms(2026, 3, 6, 8, 0, 0).unwrap());
        // Tuesday already passed this week: six days ahead.
        let tue = next(RecurrenceKind::Weekly, "TUE:23:59", at(12, 0));
        assert_eq!(tue, Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 0).unwrap());
    }

    #[test]
    fn interval_is_relative_to_now() {
        let now = at(12, 0) + Duration::milliseconds(123);
        let got = next(RecurrenceKind::Interval, "60", now);
        assert_eq!(got - now, Duration::seconds(60));
    }

    #[test]
    fn next_fire_time_matches_now_plus_interval_in_ms() {
        let now_ms = 1_700_000_000_123;
        let got = next_fire_time("interval", "90", now_ms, ZoneMode::Utc).unwrap();
        assert_eq!(got, now_ms + 90_000);
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (kind, value) in [
            (RecurrenceKind::Daily, "25:00"),
            (RecurrenceKind::Daily, "9"),
            (RecurrenceKind::Daily, "ab:cd"),
            (RecurrenceKind::Weekly, "XYZ:09:00"),
            (RecurrenceKind::Weekly, "MON"),
            (RecurrenceKind::Weekly, "MON:09:61"),
            (RecurrenceKind::Interval, "0"),
            (RecurrenceKind::Interval, "-5"),
            (RecurrenceKind::Interval, "1.5"),
            (RecurrenceKind::Once, "next tuesday"),
        ] {
            assert!(
                matches!(Recurrence::parse(kind, value), Err(SchedulerError::InvalidSchedule(_))),
                "{kind}:{value} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_kind_is_signalled() {
        let err = next_fire_time("fortnightly", "1", 0, ZoneMode::Utc).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownRecurrenceKind(_)));
    }

    #[test]
    fn fixed_offset_zone_reads_wall_time_locally() {
        let plus_two = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        // 12:00 UTC is 14:00 at +02:00, so 13:00 local has passed today.
        let now = at(12, 0).with_timezone(&plus_two);
        let got = Recurrence::parse(RecurrenceKind::Daily, "13:00")
            .unwrap()
            .next_after(&now);
        assert_eq!(got, Utc.with_ymd_and_hms(2026, 3, 5, 11, 0, 0).unwrap());
    }

    /// Central European rules for 2026 only: +01:00, and +02:00 from
    /// 2026-03-29 01:00 UTC until 2026-10-25 01:00 UTC.
    #[derive(Debug, Clone, Copy)]
    struct Cet2026;

    impl Cet2026 {
        fn winter() -> FixedOffset {
            FixedOffset::east_opt(3600).unwrap()
        }

        fn summer() -> FixedOffset {
            FixedOffset::east_opt(2 * 3600).unwrap()
        }

        fn local(month: u32, day: u32, h: u32, m: u32) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2026, month, day)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap()
        }
    }

    impl TimeZone for Cet2026 {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            Cet2026
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let (spring, fall) = (Self::local(3, 29, 2, 0), Self::local(10, 25, 2, 0));
            let hour = Duration::hours(1);
            if *local >= spring && *local < spring + hour {
                LocalResult::None
            } else if *local >= fall && *local < fall + hour {
                LocalResult::Ambiguous(Self::summer(), Self::winter())
            } else if *local >= spring + hour && *local < fall {
                LocalResult::Single(Self::summer())
            } else {
                LocalResult::Single(Self::winter())
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_hms_opt(0, 0, 0).unwrap())
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc >= Self::local(3, 29, 1, 0) && *utc < Self::local(10, 25, 1, 0) {
                Self::summer()
            } else {
                Self::winter()
            }
        }
    }

    fn utc(month: u32, day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, month, day, h, m, 0).unwrap()
    }

    #[test]
    fn wall_time_in_spring_gap_moves_forward_an_hour() {
        // 00:00 local, winter time.
        let now = utc(3, 28, 23, 0).with_timezone(&Cet2026);
        let got = Recurrence::parse(RecurrenceKind::Daily, "02:30")
            .unwrap()
            .next_after(&now);
        // 02:30 does not exist; 03:30 at +02:00.
        assert_eq!(got, utc(3, 29, 1, 30));

        let once = Recurrence::parse(RecurrenceKind::Once, "2026-03-29T02:00")
            .unwrap()
            .next_after(&now);
        assert_eq!(once, utc(3, 29, 1, 0));
    }

    #[test]
    fn wall_time_in_fall_overlap_takes_the_first_occurrence() {
        // 00:00 local, summer time.
        let now = utc(10, 24, 22, 0).with_timezone(&Cet2026);
        let got = Recurrence::parse(RecurrenceKind::Daily, "02:30")
            .unwrap()
            .next_after(&now);
        // 02:30 happens twice; the +02:00 one comes first.
        assert_eq!(got, utc(10, 25, 0, 30));

        // Past the first 02:30, the second one is not another fire.
        let between = utc(10, 25, 0, 45).with_timezone(&Cet2026);
        let got = Recurrence::parse(RecurrenceKind::Daily, "02:30")
            .unwrap()
            .next_after(&between);
        assert_eq!(got, utc(10, 26, 1, 30));
    }

    #[test]
    fn wall_time_either_side_of_a_transition_uses_that_day_offset() {
        let now = utc(3, 29, 12, 0).with_timezone(&Cet2026);
        let got = Recurrence::parse(RecurrenceKind::Weekly, "SUN:09:00")
            .unwrap()
            .next_after(&now);
        // Next Sunday 09:00 is summer time.
        assert_eq!(got, utc(4, 5, 7, 0));

        let winter = utc(3, 28, 12, 0).with_timezone(&Cet2026);
        let got = Recurrence::parse(RecurrenceKind::Daily, "09:00")
            .unwrap()
            .next_after(&winter);
        // 09:00 on the transition day itself is already +02:00.
        assert_eq!(got, utc(3, 29, 7, 0));
    }
}
