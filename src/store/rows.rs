//! On-disk shape of the store. Rows stay loosely typed so that a record which
//! violates an invariant can be reported and kept instead of failing the whole
//! file.

use crate::types::alert::{AlertWatch, Severity};
use crate::types::subscription::{
    Cadence, CadenceKind, DAILY_OUTLOOK_DAYS, DEFAULT_WEEKLY_OUTLOOK_DAYS, DeliverySubscription,
    LocalTime, MAX_WEEKLY_OUTLOOK_DAYS, MIN_WEEKLY_OUTLOOK_DAYS, SubscriptionId, Weekday,
};
use crate::types::timestamp;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub(crate) const FORMAT_VERSION: u32 = 1;

/// Record arrays are read as raw JSON so one malformed row cannot fail the
/// whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreFile {
    pub(crate) version: u32,
    pub(crate) next_id: u64,
    #[serde(default)]
    pub(crate) subscriptions: Vec<Value>,
    #[serde(default)]
    pub(crate) alert_watches: Vec<Value>,
    #[serde(default)]
    pub(crate) default_locations: Vec<DefaultLocationRow>,
}

/// A persisted row that cannot be turned back into a valid record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("corrupt {kind} record {key}: {reason}")]
pub struct StoreCorruption {
    pub kind: &'static str,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SubscriptionRow {
    pub(crate) id: u64,
    pub(crate) owner: String,
    pub(crate) location: String,
    pub(crate) cadence: String,
    #[serde(default)]
    pub(crate) weekday: Option<String>,
    pub(crate) hour: u32,
    pub(crate) minute: u32,
    #[serde(default)]
    pub(crate) outlook_days: Option<u32>,
    pub(crate) active: bool,
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) last_fired_at: Option<String>,
    pub(crate) next_fire_at: String,
}

impl SubscriptionRow {
    pub(crate) fn from_value(value: &Value) -> Result<DeliverySubscription, StoreCorruption> {
        let row: Self = serde_json::from_value(value.clone()).map_err(|err| StoreCorruption {
            kind: "subscription",
            key: raw_key(value, &["id"]),
            reason: err.to_string(),
        })?;
        row.decode()
    }

    pub(crate) fn decode(&self) -> Result<DeliverySubscription, StoreCorruption> {
        let corrupt = |reason: String| StoreCorruption {
            kind: "subscription",
            key: self.id.to_string(),
            reason,
        };

        let kind = CadenceKind::parse(&self.cadence).map_err(|err| corrupt(err.to_string()))?;
        let weekday = self
            .weekday
            .as_deref()
            .map(Weekday::parse)
            .transpose()
            .map_err(|err| corrupt(err.to_string()))?;
        let cadence = Cadence::from_parts(kind, weekday).map_err(|err| corrupt(err.to_string()))?;

        let hour = u8::try_from(self.hour).map_err(|_| corrupt(format!("hour {}", self.hour)))?;
        let minute =
            u8::try_from(self.minute).map_err(|_| corrupt(format!("minute {}", self.minute)))?;
        let local_time = LocalTime::new(hour, minute).map_err(|err| corrupt(err.to_string()))?;

        if self.owner.trim().is_empty() || self.location.trim().is_empty() {
            return Err(corrupt("empty owner or location".to_string()));
        }

        let outlook_days = match cadence {
            Cadence::Daily => DAILY_OUTLOOK_DAYS,
            Cadence::Weekly(_) => self
                .outlook_days
                .map_or(DEFAULT_WEEKLY_OUTLOOK_DAYS, |days| {
                    days.clamp(
                        u32::from(MIN_WEEKLY_OUTLOOK_DAYS),
                        u32::from(MAX_WEEKLY_OUTLOOK_DAYS),
                    ) as u8
                }),
        };

        let parse = |field: &str, raw: &str| {
            timestamp::parse(raw).map_err(|err| corrupt(format!("{field}: {err}")))
        };
        let created_at = parse("created_at", &self.created_at)?;
        let next_fire_at = parse("next_fire_at", &self.next_fire_at)?;
        let last_fired_at = self
            .last_fired_at
            .as_deref()
            .map(|raw| parse("last_fired_at", raw))
            .transpose()?;
        if let Some(last) = last_fired_at
            && next_fire_at <= last
        {
            return Err(corrupt("next_fire_at is not after last_fired_at".to_string()));
        }

        Ok(DeliverySubscription {
            id: SubscriptionId(self.id),
            owner: self.owner.clone(),
            location: self.location.clone(),
            cadence,
            local_time,
            outlook_days,
            active: self.active,
            created_at,
            last_fired_at,
            next_fire_at,
        })
    }
}

impl From<&DeliverySubscription> for SubscriptionRow {
    fn from(subscription: &DeliverySubscription) -> Self {
        Self {
            id: subscription.id.0,
            owner: subscription.owner.clone(),
            location: subscription.location.clone(),
            cadence: subscription.cadence.kind().label().to_string(),
            weekday: subscription
                .cadence
                .weekday()
                .map(|weekday| weekday.label().to_string()),
            hour: u32::from(subscription.local_time.hour()),
            minute: u32::from(subscription.local_time.minute()),
            outlook_days: Some(u32::from(subscription.outlook_days)),
            active: subscription.active,
            created_at: timestamp::format(subscription.created_at),
            last_fired_at: subscription.last_fired_at.map(timestamp::format),
            next_fire_at: timestamp::format(subscription.next_fire_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AlertWatchRow {
    pub(crate) owner: String,
    pub(crate) location: String,
    pub(crate) min_severity: String,
    pub(crate) enabled: bool,
    #[serde(default)]
    pub(crate) seen_alert_ids: BTreeSet<String>,
}

impl AlertWatchRow {
    pub(crate) fn from_value(value: &Value) -> Result<AlertWatch, StoreCorruption> {
        let row: Self = serde_json::from_value(value.clone()).map_err(|err| StoreCorruption {
            kind: "alert watch",
            key: raw_key(value, &["owner", "location"]),
            reason: err.to_string(),
        })?;
        row.decode()
    }

    pub(crate) fn decode(&self) -> Result<AlertWatch, StoreCorruption> {
        let min_severity = Severity::parse(&self.min_severity).map_err(|err| StoreCorruption {
            kind: "alert watch",
            key: format!("{}/{}", self.owner, self.location),
            reason: err.to_string(),
        })?;
        Ok(AlertWatch {
            owner: self.owner.clone(),
            location: self.location.clone(),
            min_severity,
            enabled: self.enabled,
            seen_alert_ids: self.seen_alert_ids.clone(),
        })
    }
}

impl From<&AlertWatch> for AlertWatchRow {
    fn from(watch: &AlertWatch) -> Self {
        Self {
            owner: watch.owner.clone(),
            location: watch.location.clone(),
            min_severity: watch.min_severity.label().to_string(),
            enabled: watch.enabled,
            seen_alert_ids: watch.seen_alert_ids.clone(),
        }
    }
}

/// Best-effort identification of a row that did not even deserialize.
fn raw_key(value: &Value, fields: &[&str]) -> String {
    let parts: Vec<String> = fields
        .iter()
        .map(|field| match value.get(field) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => "?".to_string(),
        })
        .collect();
    parts.join("/")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DefaultLocationRow {
    pub(crate) owner: String,
    pub(crate) location: String,
}
