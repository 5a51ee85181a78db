use crate::types::timestamp;
use crate::types::validation::ValidationError;

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub const DAILY_OUTLOOK_DAYS: u8 = 2;
pub const DEFAULT_WEEKLY_OUTLOOK_DAYS: u8 = 7;
pub const MIN_WEEKLY_OUTLOOK_DAYS: u8 = 3;
pub const MAX_WEEKLY_OUTLOOK_DAYS: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value = raw.trim().to_ascii_lowercase();
        let weekday = match value.as_str() {
            "monday" | "mon" => Self::Monday,
            "tuesday" | "tue" | "tues" => Self::Tuesday,
            "wednesday" | "wed" => Self::Wednesday,
            "thursday" | "thu" | "thurs" => Self::Thursday,
            "friday" | "fri" => Self::Friday,
            "saturday" | "sat" => Self::Saturday,
            "sunday" | "sun" => Self::Sunday,
            _ => return Err(ValidationError::InvalidWeekday(raw.trim().to_string())),
        };
        Ok(weekday)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }

    pub fn to_time(self) -> time::Weekday {
        match self {
            Self::Monday => time::Weekday::Monday,
            Self::Tuesday => time::Weekday::Tuesday,
            Self::Wednesday => time::Weekday::Wednesday,
            Self::Thursday => time::Weekday::Thursday,
            Self::Friday => time::Weekday::Friday,
            Self::Saturday => time::Weekday::Saturday,
            Self::Sunday => time::Weekday::Sunday,
        }
    }

    pub fn from_time(weekday: time::Weekday) -> Self {
        match weekday {
            time::Weekday::Monday => Self::Monday,
            time::Weekday::Tuesday => Self::Tuesday,
            time::Weekday::Wednesday => Self::Wednesday,
            time::Weekday::Thursday => Self::Thursday,
            time::Weekday::Friday => Self::Friday,
            time::Weekday::Saturday => Self::Saturday,
            time::Weekday::Sunday => Self::Sunday,
        }
    }
}

/// Cadence as typed by the user, before a weekday has been attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadenceKind {
    Daily,
    Weekly,
}

impl CadenceKind {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            _ => Err(ValidationError::InvalidCadence(raw.trim().to_string())),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "weekday", rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly(Weekday),
}

impl Cadence {
    /// Rejects `Weekly` without a weekday and a weekday paired with `Daily`.
    pub fn from_parts(kind: CadenceKind, weekday: Option<Weekday>) -> Result<Self, ValidationError> {
        match (kind, weekday) {
            (CadenceKind::Daily, None) => Ok(Self::Daily),
            (CadenceKind::Daily, Some(_)) => Err(ValidationError::UnexpectedWeekday),
            (CadenceKind::Weekly, Some(weekday)) => Ok(Self::Weekly(weekday)),
            (CadenceKind::Weekly, None) => Err(ValidationError::MissingWeekday),
        }
    }

    pub fn kind(self) -> CadenceKind {
        match self {
            Self::Daily => CadenceKind::Daily,
            Self::Weekly(_) => CadenceKind::Weekly,
        }
    }

    pub fn weekday(self) -> Option<Weekday> {
        match self {
            Self::Daily => None,
            Self::Weekly(weekday) => Some(weekday),
        }
    }

    pub fn matches(self, date: time::Date) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekly(weekday) => date.weekday() == weekday.to_time(),
        }
    }

    /// Forecast length for this cadence. Daily always covers today and tomorrow.
    pub fn outlook_days(self, requested: Option<u8>) -> Result<u8, ValidationError> {
        match (self, requested) {
            (Self::Daily, _) => Ok(DAILY_OUTLOOK_DAYS),
            (Self::Weekly(_), None) => Ok(DEFAULT_WEEKLY_OUTLOOK_DAYS),
            (Self::Weekly(_), Some(days))
                if (MIN_WEEKLY_OUTLOOK_DAYS..=MAX_WEEKLY_OUTLOOK_DAYS).contains(&days) =>
            {
                Ok(days)
            }
            (Self::Weekly(_), Some(days)) => Err(ValidationError::OutlookDays(days)),
        }
    }
}

/// Wall-clock hour and minute in the configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalTime {
    hour: u8,
    minute: u8,
}

impl LocalTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ValidationError> {
        if hour > 23 || minute > 59 {
            return Err(ValidationError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// Accepts `H:MM`, `HH:MM` and `HHMM`, each optionally followed by `am`/`pm`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidTime(raw.trim().to_string());
        let compact: String = raw
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        let (clock, meridiem) = if let Some(rest) = compact.strip_suffix("am") {
            (rest, Some(false))
        } else if let Some(rest) = compact.strip_suffix("pm") {
            (rest, Some(true))
        } else {
            (compact.as_str(), None)
        };
        if !clock.bytes().all(|b| b.is_ascii_digit() || b == b':') {
            return Err(invalid());
        }

        let (hour, minute) = match clock.split_once(':') {
            Some((hour, minute))
                if (1..=2).contains(&hour.len())
                    && minute.len() == 2
                    && !minute.contains(':') =>
            {
                (hour, minute)
            }
            Some(_) => return Err(invalid()),
            None if clock.len() == 4 => clock.split_at(2),
            None => return Err(invalid()),
        };
        let mut hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;

        if let Some(pm) = meridiem {
            if hour == 0 || hour > 12 {
                return Err(invalid());
            }
            hour = (hour % 12) + if pm { 12 } else { 0 };
        }

        Self::new(hour, minute).map_err(|_| invalid())
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn to_time(self) -> time::Time {
        time::Time::from_hms(self.hour, self.minute, 0).unwrap_or(time::Time::MIDNIGHT)
    }
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliverySubscription {
    pub id: SubscriptionId,
    pub owner: String,
    pub location: String,
    pub cadence: Cadence,
    pub local_time: LocalTime,
    pub outlook_days: u8,
    pub active: bool,
    #[serde(serialize_with = "timestamp::serialize")]
    pub created_at: OffsetDateTime,
    #[serde(serialize_with = "timestamp::option::serialize")]
    pub last_fired_at: Option<OffsetDateTime>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub next_fire_at: OffsetDateTime,
}

/// Input to `SubscriptionStore::create`. Cadence and weekday arrive unpaired so
/// the store can reject malformed combinations itself.
#[derive(Debug, Clone)]
pub struct SubscriptionDraft {
    pub owner: String,
    pub location: String,
    pub cadence: CadenceKind,
    pub weekday: Option<Weekday>,
    pub local_time: LocalTime,
    pub outlook_days: Option<u8>,
    pub created_at: OffsetDateTime,
    pub next_fire_at: OffsetDateTime,
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn local_time_parse__should_accept_24h_formats() {
        assert_eq!(LocalTime::parse("07:30"), LocalTime::new(7, 30));
        assert_eq!(LocalTime::parse("7:30"), LocalTime::new(7, 30));
        assert_eq!(LocalTime::parse("1905"), LocalTime::new(19, 5));
        assert_eq!(LocalTime::parse(" 23:59 "), LocalTime::new(23, 59));
    }

    #[test]
    fn local_time_parse__should_apply_meridiem() {
        assert_eq!(LocalTime::parse("7:00pm"), LocalTime::new(19, 0));
        assert_eq!(LocalTime::parse("7:00 PM"), LocalTime::new(19, 0));
        assert_eq!(LocalTime::parse("12:15am"), LocalTime::new(0, 15));
        assert_eq!(LocalTime::parse("12:15pm"), LocalTime::new(12, 15));
        assert_eq!(LocalTime::parse("0630am"), LocalTime::new(6, 30));
    }

    #[test]
    fn local_time_parse__should_reject_invalid_values() {
        for raw in ["", "7pm", "24:00", "12:60", "7:3", "abc", "13:00pm", "123:00", "7:-1"] {
            assert!(LocalTime::parse(raw).is_err(), "expected {raw:?} to be rejected");
        }
    }

    #[test]
    fn cadence_from_parts__should_reject_malformed_combinations() {
        assert_eq!(
            Cadence::from_parts(CadenceKind::Weekly, None),
            Err(ValidationError::MissingWeekday)
        );
        assert_eq!(
            Cadence::from_parts(CadenceKind::Daily, Some(Weekday::Monday)),
            Err(ValidationError::UnexpectedWeekday)
        );
        assert_eq!(
            Cadence::from_parts(CadenceKind::Weekly, Some(Weekday::Saturday)),
            Ok(Cadence::Weekly(Weekday::Saturday))
        );
    }

    #[test]
    fn cadence_matches__should_filter_on_weekday() {
        // 2024-01-20 is a Saturday.
        let saturday = date!(2024 - 01 - 20);
        assert!(Cadence::Daily.matches(saturday));
        assert!(Cadence::Weekly(Weekday::Saturday).matches(saturday));
        assert!(!Cadence::Weekly(Weekday::Friday).matches(saturday));
    }

    #[test]
    fn cadence_outlook_days__should_default_and_validate() {
        let weekly = Cadence::Weekly(Weekday::Sunday);
        assert_eq!(Cadence::Daily.outlook_days(Some(9)), Ok(DAILY_OUTLOOK_DAYS));
        assert_eq!(weekly.outlook_days(None), Ok(DEFAULT_WEEKLY_OUTLOOK_DAYS));
        assert_eq!(weekly.outlook_days(Some(10)), Ok(10));
        assert_eq!(weekly.outlook_days(Some(2)), Err(ValidationError::OutlookDays(2)));
    }

    #[test]
    fn weekday_parse__should_accept_names_and_abbreviations() {
        assert_eq!(Weekday::parse("Saturday"), Ok(Weekday::Saturday));
        assert_eq!(Weekday::parse("sat"), Ok(Weekday::Saturday));
        assert_eq!(Weekday::parse(" TUE "), Ok(Weekday::Tuesday));
        assert!(Weekday::parse("someday").is_err());
    }
}
