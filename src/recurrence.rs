//! Zone-aware next-occurrence arithmetic for delivery subscriptions.
//!
//! Everything here is pure: the zone is passed in explicitly and the reference
//! instant comes from the caller's clock.

use crate::types::subscription::{Cadence, LocalTime};

use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};
use time_tz::{Offset, OffsetDateTimeExt, OffsetResult, PrimitiveDateTimeExt, TimeZone, Tz};

/// Two weeks covers weekly cadences even in zones that once skipped a whole
/// calendar day.
const MAX_DAYS_AHEAD: i64 = 14;
const MAX_GAP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown time zone '{0}'")]
pub struct UnknownZone(pub String);

pub fn resolve_zone(name: &str) -> Result<&'static Tz, UnknownZone> {
    time_tz::timezones::get_by_name(name.trim()).ok_or_else(|| UnknownZone(name.trim().to_string()))
}

/// Earliest occurrence of `local_time` (on the cadence's weekday, if any)
/// strictly after `reference`, converted with the zone's offset on the target
/// date.
///
/// A wall-clock time that falls into a spring-forward gap resolves to the first
/// valid instant after it; an ambiguous fall-back time resolves to the earlier
/// of its two instants.
pub fn compute_next_fire(
    cadence: Cadence,
    local_time: LocalTime,
    reference: OffsetDateTime,
    zone: &Tz,
) -> OffsetDateTime {
    let start = reference.to_timezone(zone).date();
    let time = local_time.to_time();

    for offset in 0..=MAX_DAYS_AHEAD {
        let Some(date) = start.checked_add(Duration::days(offset)) else {
            break;
        };
        if !cadence.matches(date) {
            continue;
        }
        if let Some(candidate) = resolve_local(date, time, zone)
            && candidate > reference
        {
            return candidate;
        }
    }

    // Unreachable with real zone data; keeps the function total.
    tracing::error!(
        ?cadence,
        %local_time,
        reference = %reference,
        zone = zone.name(),
        "no occurrence found, falling back to a fixed delay"
    );
    reference + Duration::days(1)
}

fn resolve_local(date: Date, time: Time, zone: &Tz) -> Option<OffsetDateTime> {
    let nominal = PrimitiveDateTime::new(date, time);
    for step in 0..=MAX_GAP_MINUTES {
        let wall = nominal.checked_add(Duration::minutes(step))?;
        match wall.assume_timezone(zone) {
            OffsetResult::Some(at) => return Some(at),
            OffsetResult::Ambiguous(first, second) => return Some(first.min(second)),
            OffsetResult::None => continue,
        }
    }
    None
}

/// `MM-DD-YYYY HH:MM ABBR` in the given zone, for listings.
pub fn format_local(at: OffsetDateTime, zone: &Tz) -> String {
    let local = at.to_timezone(zone);
    let abbreviation = zone.get_offset_utc(&at).name().to_string();
    let format = format_description!("[month]-[day]-[year] [hour]:[minute]");
    match local.format(&format) {
        Ok(rendered) => format!("{rendered} {abbreviation}"),
        Err(_) => local.to_string(),
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::types::subscription::Weekday;
    use time::macros::datetime;

    fn chicago() -> &'static Tz {
        resolve_zone("America/Chicago").expect("zone")
    }

    fn at(hour: u8, minute: u8) -> LocalTime {
        LocalTime::new(hour, minute).expect("local time")
    }

    #[test]
    fn resolve_zone__should_reject_unknown_names() {
        assert!(resolve_zone("America/Chicago").is_ok());
        assert_eq!(
            resolve_zone("Mars/Olympus"),
            Err(UnknownZone("Mars/Olympus".to_string()))
        );
    }

    #[test]
    fn compute_next_fire__should_roll_daily_to_tomorrow_when_time_passed() {
        // Given 2024-01-15 20:00 CST
        let reference = datetime!(2024-01-15 20:00 -6);

        // When
        let next = compute_next_fire(Cadence::Daily, at(7, 30), reference, chicago());

        // Then 2024-01-16 07:30 CST
        assert_eq!(next, datetime!(2024-01-16 07:30 -6));
    }

    #[test]
    fn compute_next_fire__should_keep_daily_today_when_time_ahead() {
        let reference = datetime!(2024-01-15 06:00 -6);

        let next = compute_next_fire(Cadence::Daily, at(7, 30), reference, chicago());

        assert_eq!(next, datetime!(2024-01-15 07:30 -6));
    }

    #[test]
    fn compute_next_fire__should_be_strictly_after_reference() {
        let reference = datetime!(2024-01-15 07:30 -6);

        let next = compute_next_fire(Cadence::Daily, at(7, 30), reference, chicago());

        assert_eq!(next, datetime!(2024-01-16 07:30 -6));
    }

    #[test]
    fn compute_next_fire__should_pick_upcoming_weekday() {
        // Given Tuesday 2024-01-16
        let reference = datetime!(2024-01-16 10:00 -6);

        // When
        let next = compute_next_fire(
            Cadence::Weekly(Weekday::Saturday),
            at(7, 30),
            reference,
            chicago(),
        );

        // Then Saturday 2024-01-20
        assert_eq!(next, datetime!(2024-01-20 07:30 -6));
    }

    #[test]
    fn compute_next_fire__should_fire_weekly_today_when_time_still_ahead() {
        // Given Saturday 2024-01-20 at 06:00, before the 07:30 target
        let reference = datetime!(2024-01-20 06:00 -6);

        // When
        let next = compute_next_fire(
            Cadence::Weekly(Weekday::Saturday),
            at(7, 30),
            reference,
            chicago(),
        );

        // Then the same day, not a week out
        assert_eq!(next, datetime!(2024-01-20 07:30 -6));
    }

    #[test]
    fn compute_next_fire__should_advance_weekly_a_full_week_after_firing() {
        // Given a Saturday fire just after 07:30
        let reference = datetime!(2024-01-20 07:30:05 -6);

        // When
        let next = compute_next_fire(
            Cadence::Weekly(Weekday::Saturday),
            at(7, 30),
            reference,
            chicago(),
        );

        // Then
        assert_eq!(next, datetime!(2024-01-27 07:30 -6));
    }

    #[test]
    fn compute_next_fire__should_keep_local_time_across_dst_start() {
        // Given the evening before the March 2024 transition (CST, -6)
        let reference = datetime!(2024-03-09 20:00 -6);

        // When
        let next = compute_next_fire(Cadence::Daily, at(19, 0), reference, chicago());

        // Then 19:00 CDT (-5)
        assert_eq!(next, datetime!(2024-03-10 19:00 -5));
    }

    #[test]
    fn compute_next_fire__should_keep_local_time_across_dst_end() {
        let reference = datetime!(2024-11-02 20:00 -5);

        let next = compute_next_fire(Cadence::Daily, at(19, 0), reference, chicago());

        assert_eq!(next, datetime!(2024-11-03 19:00 -6));
    }

    #[test]
    fn compute_next_fire__should_resolve_spring_forward_gap_to_gap_end() {
        // 02:30 does not exist in Chicago on 2024-03-10
        let reference = datetime!(2024-03-09 12:00 -6);

        let next = compute_next_fire(Cadence::Daily, at(2, 30), reference, chicago());

        assert_eq!(next, datetime!(2024-03-10 03:00 -5));
    }

    #[test]
    fn compute_next_fire__should_resolve_fall_back_ambiguity_to_first_instant() {
        // 01:30 happens twice in Chicago on 2024-11-03
        let reference = datetime!(2024-11-02 12:00 -5);

        let next = compute_next_fire(Cadence::Daily, at(1, 30), reference, chicago());

        assert_eq!(next, datetime!(2024-11-03 01:30 -5));
    }

    #[test]
    fn compute_next_fire__should_project_back_to_local_time() {
        let zone = chicago();
        let cadences = [
            Cadence::Daily,
            Cadence::Weekly(Weekday::Monday),
            Cadence::Weekly(Weekday::Saturday),
            Cadence::Weekly(Weekday::Sunday),
        ];
        let local_time = at(19, 45);
        let mut reference = datetime!(2024-02-25 00:00 UTC);
        let end = datetime!(2024-04-05 00:00 UTC);

        while reference < end {
            for cadence in cadences {
                let next = compute_next_fire(cadence, local_time, reference, zone);
                let local = next.to_timezone(zone);

                assert!(next > reference, "{cadence:?} at {reference}");
                assert!(next - reference <= Duration::days(8));
                assert_eq!((local.hour(), local.minute()), (19, 45));
                if let Some(weekday) = cadence.weekday() {
                    assert_eq!(local.weekday(), weekday.to_time());
                }
            }
            reference += Duration::hours(7);
        }
    }

    #[test]
    fn format_local__should_include_zone_abbreviation() {
        let rendered = format_local(datetime!(2024-01-16 13:30 UTC), chicago());

        assert_eq!(rendered, "01-16-2024 07:30 CST");
    }
}
