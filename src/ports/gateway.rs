//! Contracts of the dispatch gateway: weather/hazard lookups and direct
//! messages. Rendering, geocoding and the chat protocol live behind these.

use crate::types::alert::Hazard;
use crate::types::subscription::{CadenceKind, SubscriptionId};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Opaque forecast payload, passed through to the messenger untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeatherContent(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectMessage {
    Forecast {
        subscription_id: SubscriptionId,
        location: String,
        cadence: CadenceKind,
        content: WeatherContent,
    },
    Hazard {
        location: String,
        hazard: Hazard,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("location not found: {0}")]
    LocationNotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("delivery blocked: {0}")]
    DeliveryBlocked(String),
}

impl GatewayError {
    /// Only upstream outages are worth retrying within a tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }
}

pub trait WeatherGateway: Clone + Send + Sync + 'static {
    type ResolveFut<'a>: Future<Output = Result<Coordinates, GatewayError>> + Send + 'a
    where
        Self: 'a;
    type WeatherFut<'a>: Future<Output = Result<WeatherContent, GatewayError>> + Send + 'a
    where
        Self: 'a;
    type HazardsFut<'a>: Future<Output = Result<Vec<Hazard>, GatewayError>> + Send + 'a
    where
        Self: 'a;

    fn resolve_location<'a>(&'a self, location: &'a str) -> Self::ResolveFut<'a>;
    fn fetch_weather<'a>(&'a self, coordinates: Coordinates, days: u8) -> Self::WeatherFut<'a>;
    fn fetch_active_hazards<'a>(&'a self, coordinates: Coordinates) -> Self::HazardsFut<'a>;
}

pub trait Messenger: Clone + Send + Sync + 'static {
    type Fut<'a>: Future<Output = Result<(), GatewayError>> + Send + 'a
    where
        Self: 'a;

    fn send_direct_message<'a>(&'a self, owner: &'a str, message: &'a DirectMessage)
    -> Self::Fut<'a>;
}
