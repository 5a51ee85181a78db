//! User-facing operations: validate input, resolve locations up front and
//! hand well-formed drafts to the store.

use crate::ports;
use crate::ports::gateway::GatewayError;
use crate::recurrence::{compute_next_fire, format_local};
use crate::retry::{RetryPolicy, with_retry};
use crate::store::{StoreError, SubscriptionStore};
use crate::types::alert::{AlertWatch, Severity};
use crate::types::subscription::{
    Cadence, CadenceKind, DeliverySubscription, LocalTime, SubscriptionDraft, SubscriptionId,
    Weekday,
};
use crate::types::validation::{ValidationError, normalize_key};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time_tz::Tz;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("location not found: {0}")]
    LocationNotFound(String),

    #[error("weather service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("subscription not found")]
    NotFoundOrNotOwner,

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(err) => Self::Validation(err),
            StoreError::NotFoundOrNotOwner => Self::NotFoundOrNotOwner,
            other => Self::Store(other),
        }
    }
}

impl From<GatewayError> for CommandError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::LocationNotFound(location) => Self::LocationNotFound(location),
            GatewayError::UpstreamUnavailable(reason) | GatewayError::DeliveryBlocked(reason) => {
                Self::UpstreamUnavailable(reason)
            }
        }
    }
}

/// Raw creation request; every field is parsed and validated here.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscription {
    pub owner: String,
    #[serde(default)]
    pub location: Option<String>,
    pub cadence: String,
    pub local_time: String,
    #[serde(default)]
    pub weekday: Option<String>,
    #[serde(default)]
    pub outlook_days: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionSummary {
    #[serde(flatten)]
    pub subscription: DeliverySubscription,
    /// `next_fire_at` rendered in the configured zone.
    pub next_fire_local: String,
}

#[derive(Clone)]
pub struct CommandService<T, W> {
    time: T,
    gateway: W,
    store: Arc<SubscriptionStore>,
    zone: &'static Tz,
    retry: RetryPolicy,
}

impl<T, W> CommandService<T, W>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    pub fn new(
        time: T,
        gateway: W,
        store: Arc<SubscriptionStore>,
        zone: &'static Tz,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            time,
            gateway,
            store,
            zone,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    pub fn zone(&self) -> &'static Tz {
        self.zone
    }

    fn summarize(&self, subscription: DeliverySubscription) -> SubscriptionSummary {
        SubscriptionSummary {
            next_fire_local: format_local(subscription.next_fire_at, self.zone),
            subscription,
        }
    }

    /// Explicit location, or the owner's saved default.
    fn location_for(&self, owner: &str, location: Option<&str>) -> Result<String, CommandError> {
        match location.map(str::trim).filter(|location| !location.is_empty()) {
            Some(location) => Ok(normalize_key(location, "location")?),
            None => self
                .store
                .default_location(owner)?
                .ok_or(CommandError::Validation(ValidationError::MissingLocation)),
        }
    }

    async fn ensure_location(&self, location: &str) -> Result<(), CommandError> {
        with_retry(&self.time, &self.retry, || {
            self.gateway.resolve_location(location)
        })
        .await?;
        Ok(())
    }

    pub async fn create_subscription(
        &self,
        request: CreateSubscription,
    ) -> Result<SubscriptionSummary, CommandError> {
        let owner = normalize_key(&request.owner, "owner")?;
        let kind = CadenceKind::parse(&request.cadence)?;
        let weekday = request
            .weekday
            .as_deref()
            .map(str::trim)
            .filter(|weekday| !weekday.is_empty())
            .map(Weekday::parse)
            .transpose()?;
        let cadence = Cadence::from_parts(kind, weekday)?;
        let local_time = LocalTime::parse(&request.local_time)?;
        cadence.outlook_days(request.outlook_days)?;
        let location = self.location_for(&owner, request.location.as_deref())?;

        self.ensure_location(&location).await?;

        let now = self.time.now();
        let next_fire_at = compute_next_fire(cadence, local_time, now, self.zone);
        let subscription = self.store.create(SubscriptionDraft {
            owner,
            location,
            cadence: kind,
            weekday,
            local_time,
            outlook_days: request.outlook_days,
            created_at: now,
            next_fire_at,
        })?;

        tracing::info!(
            id = %subscription.id,
            owner = %subscription.owner,
            location = %subscription.location,
            cadence = subscription.cadence.kind().label(),
            next_fire_at = %subscription.next_fire_at,
            "created subscription"
        );
        Ok(self.summarize(subscription))
    }

    pub fn list_subscriptions(&self, owner: &str) -> Result<Vec<SubscriptionSummary>, CommandError> {
        let subscriptions = self.store.list_by_owner(owner.trim())?;
        Ok(subscriptions
            .into_iter()
            .map(|subscription| self.summarize(subscription))
            .collect())
    }

    pub fn delete_subscription(&self, owner: &str, id: SubscriptionId) -> Result<(), CommandError> {
        self.store.delete(owner.trim(), id)?;
        tracing::info!(%id, owner = owner.trim(), "deleted subscription");
        Ok(())
    }

    /// Pauses or resumes. A resumed subscription fires at its next future
    /// occurrence, never for the time it spent paused.
    pub fn set_subscription_active(
        &self,
        owner: &str,
        id: SubscriptionId,
        active: bool,
    ) -> Result<SubscriptionSummary, CommandError> {
        let owner = owner.trim();
        let current = self
            .store
            .get(id)?
            .filter(|subscription| subscription.owner == owner)
            .ok_or(CommandError::NotFoundOrNotOwner)?;
        // A clock stepped back must not reschedule an occurrence that already fired.
        let reference = current
            .last_fired_at
            .map_or(self.time.now(), |last_fired_at| self.time.now().max(last_fired_at));
        let next_fire_at =
            compute_next_fire(current.cadence, current.local_time, reference, self.zone);
        let updated = self.store.set_active(owner, id, active, next_fire_at)?;
        tracing::info!(%id, owner, active, "changed subscription state");
        Ok(self.summarize(updated))
    }

    pub fn remove_all(&self, owner: &str) -> Result<usize, CommandError> {
        let removed = self.store.delete_all_for_owner(owner.trim())?;
        tracing::info!(owner = owner.trim(), removed, "removed all records for owner");
        Ok(removed)
    }

    pub async fn set_default_location(
        &self,
        owner: &str,
        location: &str,
    ) -> Result<String, CommandError> {
        let owner = normalize_key(owner, "owner")?;
        let location = normalize_key(location, "location")?;
        self.ensure_location(&location).await?;
        Ok(self.store.set_default_location(&owner, &location)?)
    }

    pub fn set_alert_watch(
        &self,
        owner: &str,
        location: Option<&str>,
        min_severity: &str,
        enabled: bool,
    ) -> Result<AlertWatch, CommandError> {
        let owner = normalize_key(owner, "owner")?;
        let min_severity = Severity::parse(min_severity)?;
        let location = self.location_for(&owner, location)?;
        let watch = self
            .store
            .upsert_alert_watch(&owner, &location, min_severity, enabled)?;
        tracing::info!(
            owner = %watch.owner,
            location = %watch.location,
            min_severity = watch.min_severity.label(),
            enabled = watch.enabled,
            "updated alert watch"
        );
        Ok(watch)
    }

    pub fn list_alert_watches(&self, owner: &str) -> Result<Vec<AlertWatch>, CommandError> {
        Ok(self.store.list_alert_watches(owner.trim())?)
    }
}
