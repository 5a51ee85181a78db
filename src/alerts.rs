//! Periodic severe-weather check for alert watches.
//!
//! Hazards are delivered at least once: an id is only recorded as seen after
//! the message went out, so a failed dispatch is retried on the next tick.

use crate::ports;
use crate::ports::gateway::{DirectMessage, GatewayError};
use crate::retry::{RetryPolicy, with_retry};
use crate::store::SubscriptionStore;
use crate::types::alert::{AlertWatch, Hazard};
use crate::types::timestamp;

use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AlertReport {
    pub locations: usize,
    pub failed_locations: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub pruned: usize,
}

impl AlertReport {
    fn merge(&mut self, other: AlertReport) {
        self.locations += other.locations;
        self.failed_locations += other.failed_locations;
        self.delivered += other.delivered;
        self.failed_deliveries += other.failed_deliveries;
        self.pruned += other.pruned;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStatus {
    pub running: bool,
    #[serde(serialize_with = "timestamp::option::serialize")]
    pub last_tick_at: Option<OffsetDateTime>,
    pub last_report: Option<AlertReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyOutcome {
    Delivered,
    Failed,
    Skipped,
}

pub struct AlertMonitor<T, W, M> {
    time: T,
    gateway: W,
    messenger: M,
    store: Arc<SubscriptionStore>,
    retry: RetryPolicy,
    parallelism: usize,
    status: watch::Sender<AlertStatus>,
}

impl<T, W, M> AlertMonitor<T, W, M>
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
        retry: RetryPolicy,
        parallelism: usize,
    ) -> Self {
        let (status, _) = watch::channel(AlertStatus::default());
        Self {
            time,
            gateway,
            messenger,
            store,
            retry,
            parallelism: parallelism.max(1),
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<AlertStatus> {
        self.status.subscribe()
    }

    pub async fn tick(&self) -> AlertReport {
        self.status.send_modify(|status| status.running = true);
        let started_at = self.time.now();

        let watches = match self.store.list_enabled_alert_watches() {
            Ok(watches) => watches,
            Err(err) => {
                tracing::error!(error = %err, "failed to load alert watches");
                self.status.send_modify(|status| status.running = false);
                return AlertReport::default();
            }
        };

        let mut by_location: BTreeMap<String, Vec<AlertWatch>> = BTreeMap::new();
        for watch in watches {
            by_location
                .entry(watch.location.clone())
                .or_default()
                .push(watch);
        }

        let mut report = AlertReport::default();
        let outcomes: Vec<AlertReport> = futures::stream::iter(by_location)
            .map(|(location, watches)| self.check_location(location, watches))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        for outcome in outcomes {
            report.merge(outcome);
        }

        if report.locations > 0 {
            tracing::info!(
                locations = report.locations,
                failed_locations = report.failed_locations,
                delivered = report.delivered,
                failed_deliveries = report.failed_deliveries,
                pruned = report.pruned,
                "alert tick finished"
            );
        }

        self.status.send_modify(|status| {
            status.running = false;
            status.last_tick_at = Some(started_at);
            status.last_report = Some(report);
        });
        report
    }

    async fn check_location(&self, location: String, watches: Vec<AlertWatch>) -> AlertReport {
        let mut report = AlertReport {
            locations: 1,
            ..AlertReport::default()
        };

        let hazards = match self.fetch_hazards(&location).await {
            Ok(hazards) => hazards,
            Err(err) => {
                tracing::warn!(%location, error = %err, "hazard lookup failed, skipping location");
                report.failed_locations = 1;
                return report;
            }
        };

        let mut handled = BTreeSet::new();
        for hazard in &hazards {
            if hazard.id.trim().is_empty() {
                tracing::debug!(%location, "ignoring hazard without id");
                continue;
            }
            if !handled.insert(hazard.id.as_str()) {
                continue;
            }
            for watch in watches.iter().filter(|watch| watch.wants(hazard)) {
                match self.notify(watch, hazard).await {
                    NotifyOutcome::Delivered => report.delivered += 1,
                    NotifyOutcome::Failed => report.failed_deliveries += 1,
                    NotifyOutcome::Skipped => {}
                }
            }
        }

        let active: BTreeSet<String> = hazards
            .iter()
            .filter(|hazard| !hazard.id.trim().is_empty())
            .map(|hazard| hazard.id.clone())
            .collect();
        match self.store.prune_seen(&location, &active) {
            Ok(pruned) => report.pruned = pruned,
            Err(err) => tracing::error!(%location, error = %err, "failed to prune seen alerts"),
        }

        report
    }

    async fn fetch_hazards(&self, location: &str) -> Result<Vec<Hazard>, GatewayError> {
        let coordinates = with_retry(&self.time, &self.retry, || {
            self.gateway.resolve_location(location)
        })
        .await?;
        with_retry(&self.time, &self.retry, || {
            self.gateway.fetch_active_hazards(coordinates)
        })
        .await
    }

    /// Sends one hazard to one watcher and records it as seen on success.
    /// The watch is re-read first; one changed since the tick's snapshot is
    /// only notified if it still wants the hazard.
    async fn notify(&self, watch: &AlertWatch, hazard: &Hazard) -> NotifyOutcome {
        match self.store.get_alert_watch(&watch.owner, &watch.location) {
            Ok(Some(current)) if current.wants(hazard) => {}
            Ok(_) => {
                tracing::debug!(
                    owner = %watch.owner,
                    location = %watch.location,
                    alert_id = %hazard.id,
                    "watch changed since snapshot, skipping hazard"
                );
                return NotifyOutcome::Skipped;
            }
            Err(err) => {
                tracing::error!(
                    owner = %watch.owner,
                    location = %watch.location,
                    error = %err,
                    "failed to re-read alert watch"
                );
                return NotifyOutcome::Failed;
            }
        }

        let message = DirectMessage::Hazard {
            location: watch.location.clone(),
            hazard: hazard.clone(),
        };
        let sent = with_retry(&self.time, &self.retry, || {
            self.messenger.send_direct_message(&watch.owner, &message)
        })
        .await;
        if let Err(err) = sent {
            tracing::warn!(
                owner = %watch.owner,
                location = %watch.location,
                alert_id = %hazard.id,
                error = %err,
                "hazard delivery failed, will retry next tick"
            );
            return NotifyOutcome::Failed;
        }

        match self
            .store
            .record_seen(&watch.owner, &watch.location, &hazard.id)
        {
            Ok(true) => {
                tracing::info!(
                    owner = %watch.owner,
                    location = %watch.location,
                    alert_id = %hazard.id,
                    severity = hazard.severity.label(),
                    "delivered hazard alert"
                );
                NotifyOutcome::Delivered
            }
            Ok(false) => {
                tracing::warn!(
                    owner = %watch.owner,
                    location = %watch.location,
                    alert_id = %hazard.id,
                    "hazard sent but watch was removed or already recorded it"
                );
                NotifyOutcome::Skipped
            }
            Err(err) => {
                tracing::error!(
                    owner = %watch.owner,
                    alert_id = %hazard.id,
                    error = %err,
                    "hazard sent but not recorded"
                );
                NotifyOutcome::Failed
            }
        }
    }
}
