use super::{DeliveryStatus, TickPhase, TickReport};
use crate::ports;
use crate::ports::gateway::{DirectMessage, GatewayError};
use crate::recurrence::compute_next_fire;
use crate::retry::{RetryPolicy, with_retry};
use crate::store::SubscriptionStore;
use crate::types::subscription::DeliverySubscription;

use futures::StreamExt;
use std::sync::Arc;
use time_tz::Tz;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireOutcome {
    Delivered,
    Failed,
    Stale,
}

/// Scans for due subscriptions and dispatches their forecasts. Holds no
/// schedule state of its own; every tick reads the store afresh.
pub struct DeliveryScheduler<T, W, M> {
    time: T,
    gateway: W,
    messenger: M,
    store: Arc<SubscriptionStore>,
    zone: &'static Tz,
    retry: RetryPolicy,
    parallelism: usize,
    status: watch::Sender<DeliveryStatus>,
}

impl<T, W, M> DeliveryScheduler<T, W, M>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
    M: ports::Messenger,
{
    pub fn new(
        time: T,
        gateway: W,
        messenger: M,
        store: Arc<SubscriptionStore>,
        zone: &'static Tz,
        retry: RetryPolicy,
        parallelism: usize,
    ) -> Self {
        let (status, _) = watch::channel(DeliveryStatus::default());
        Self {
            time,
            gateway,
            messenger,
            store,
            zone,
            retry,
            parallelism: parallelism.max(1),
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<DeliveryStatus> {
        self.status.subscribe()
    }

    fn set_phase(&self, phase: TickPhase) {
        self.status.send_modify(|status| status.phase = phase);
    }

    pub async fn tick(&self) -> TickReport {
        self.set_phase(TickPhase::Scanning);
        let started_at = self.time.now();

        let due = match self.store.list_due(started_at) {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(error = %err, "failed to scan for due subscriptions");
                self.set_phase(TickPhase::Idle);
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        if !due.is_empty() {
            self.set_phase(TickPhase::Dispatching { due: due.len() });
            let outcomes: Vec<FireOutcome> = futures::stream::iter(due)
                .map(|subscription| self.fire(subscription))
                .buffered(self.parallelism)
                .collect()
                .await;
            for outcome in outcomes {
                match outcome {
                    FireOutcome::Delivered => report.delivered += 1,
                    FireOutcome::Failed => report.failed += 1,
                    FireOutcome::Stale => report.stale += 1,
                }
            }
            self.set_phase(TickPhase::Rescheduled);
            tracing::info!(
                due = report.due,
                delivered = report.delivered,
                failed = report.failed,
                stale = report.stale,
                "delivery tick finished"
            );
        }

        self.status.send_modify(|status| {
            status.phase = TickPhase::Idle;
            status.last_tick_at = Some(started_at);
            status.last_report = Some(report);
        });
        report
    }

    /// Claims the occurrence by advancing `next_fire_at`, then dispatches.
    /// A failed dispatch is not retried before the next occurrence.
    async fn fire(&self, subscription: DeliverySubscription) -> FireOutcome {
        let fired_at = self.time.now();
        let next_fire_at = compute_next_fire(
            subscription.cadence,
            subscription.local_time,
            fired_at,
            self.zone,
        );

        match self.store.mark_fired(
            subscription.id,
            subscription.next_fire_at,
            fired_at,
            next_fire_at,
        ) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(id = %subscription.id, "subscription already advanced, skipping");
                return FireOutcome::Stale;
            }
            Err(err) => {
                tracing::error!(
                    id = %subscription.id,
                    error = %err,
                    "failed to record fire, leaving subscription due"
                );
                return FireOutcome::Failed;
            }
        }

        match self.deliver(&subscription).await {
            Ok(()) => {
                tracing::info!(
                    id = %subscription.id,
                    owner = %subscription.owner,
                    location = %subscription.location,
                    next_fire_at = %next_fire_at,
                    "delivered forecast"
                );
                FireOutcome::Delivered
            }
            Err(err) => {
                tracing::warn!(
                    id = %subscription.id,
                    owner = %subscription.owner,
                    location = %subscription.location,
                    error = %err,
                    next_fire_at = %next_fire_at,
                    "forecast delivery failed, skipping to next occurrence"
                );
                FireOutcome::Failed
            }
        }
    }

    async fn deliver(&self, subscription: &DeliverySubscription) -> Result<(), GatewayError> {
        let coordinates = with_retry(&self.time, &self.retry, || {
            self.gateway.resolve_location(&subscription.location)
        })
        .await?;
        let content = with_retry(&self.time, &self.retry, || {
            self.gateway
                .fetch_weather(coordinates, subscription.outlook_days)
        })
        .await?;

        let message = DirectMessage::Forecast {
            subscription_id: subscription.id,
            location: subscription.location.clone(),
            cadence: subscription.cadence.kind(),
            content,
        };
        with_retry(&self.time, &self.retry, || {
            self.messenger
                .send_direct_message(&subscription.owner, &message)
        })
        .await
    }
}
