mod scheduler;

pub use scheduler::DeliveryScheduler;

use crate::types::timestamp;

use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TickPhase {
    #[default]
    Idle,
    Scanning,
    Dispatching {
        due: usize,
    },
    Rescheduled,
}

/// Outcome counts of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Already advanced by an overlapping tick; not dispatched.
    pub stale: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryStatus {
    pub phase: TickPhase,
    #[serde(serialize_with = "timestamp::option::serialize")]
    pub last_tick_at: Option<OffsetDateTime>,
    pub last_report: Option<TickReport>,
}
