use crate::ports;
use crate::ports::gateway::{Coordinates, DirectMessage, GatewayError, WeatherContent};
use crate::types::alert::Hazard;

use std::collections::{HashMap, HashSet};
use std::future::Ready;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Clone)]
pub(crate) struct FixedTime {
    now: Arc<Mutex<OffsetDateTime>>,
    durations: Arc<Mutex<Vec<Duration>>>,
}

impl FixedTime {
    pub(crate) fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            durations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn set(&self, now: OffsetDateTime) {
        *self.now.lock().expect("now lock") = now;
    }

    pub(crate) fn sleep_durations(&self) -> Vec<Duration> {
        self.durations.lock().expect("durations lock").clone()
    }
}

impl ports::TimeProvider for FixedTime {
    type Sleep<'a>
        = Ready<()>
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("now lock")
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        self.durations
            .lock()
            .expect("durations lock")
            .push(duration);
        std::future::ready(())
    }
}

#[derive(Default)]
struct FakeState {
    locations: HashMap<String, Coordinates>,
    hazards: HashMap<String, Vec<Hazard>>,
    failing_hazard_feeds: HashSet<String>,
    weather_outages: u32,
    blocked_owners: HashSet<String>,
    message_outages: HashMap<String, u32>,
    sent: Vec<(String, DirectMessage)>,
    resolve_calls: Vec<String>,
    hazard_calls: usize,
}

impl FakeState {
    fn location_at(&self, coordinates: Coordinates) -> Option<String> {
        self.locations
            .iter()
            .find(|(_, known)| **known == coordinates)
            .map(|(name, _)| name.clone())
    }
}

/// Scripted stand-in for both gateway ports.
#[derive(Clone, Default)]
pub(crate) struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().expect("fake gateway lock"))
    }

    pub(crate) fn add_location(&self, location: &str) {
        self.with_state(|state| {
            let latitude = 40.0 + state.locations.len() as f64;
            state
                .locations
                .entry(location.to_string())
                .or_insert(Coordinates {
                    latitude,
                    longitude: -87.0,
                });
        });
    }

    pub(crate) fn set_hazards(&self, location: &str, hazards: Vec<Hazard>) {
        self.with_state(|state| {
            state.hazards.insert(location.to_string(), hazards);
        });
    }

    pub(crate) fn fail_hazard_feed(&self, location: &str, failing: bool) {
        self.with_state(|state| {
            if failing {
                state.failing_hazard_feeds.insert(location.to_string());
            } else {
                state.failing_hazard_feeds.remove(location);
            }
        });
    }

    pub(crate) fn fail_weather(&self, times: u32) {
        self.with_state(|state| state.weather_outages = times);
    }

    pub(crate) fn block_owner(&self, owner: &str, blocked: bool) {
        self.with_state(|state| {
            if blocked {
                state.blocked_owners.insert(owner.to_string());
            } else {
                state.blocked_owners.remove(owner);
            }
        });
    }

    pub(crate) fn fail_messages(&self, owner: &str, times: u32) {
        self.with_state(|state| {
            state.message_outages.insert(owner.to_string(), times);
        });
    }

    pub(crate) fn sent(&self) -> Vec<(String, DirectMessage)> {
        self.with_state(|state| state.sent.clone())
    }

    pub(crate) fn resolve_calls(&self) -> Vec<String> {
        self.with_state(|state| state.resolve_calls.clone())
    }

    pub(crate) fn hazard_calls(&self) -> usize {
        self.with_state(|state| state.hazard_calls)
    }
}

impl ports::WeatherGateway for FakeGateway {
    type ResolveFut<'a>
        = Ready<Result<Coordinates, GatewayError>>
    where
        Self: 'a;
    type WeatherFut<'a>
        = Ready<Result<WeatherContent, GatewayError>>
    where
        Self: 'a;
    type HazardsFut<'a>
        = Ready<Result<Vec<Hazard>, GatewayError>>
    where
        Self: 'a;

    fn resolve_location<'a>(&'a self, location: &'a str) -> Self::ResolveFut<'a> {
        let result = self.with_state(|state| {
            state.resolve_calls.push(location.to_string());
            state
                .locations
                .get(location)
                .copied()
                .ok_or_else(|| GatewayError::LocationNotFound(location.to_string()))
        });
        std::future::ready(result)
    }

    fn fetch_weather<'a>(&'a self, coordinates: Coordinates, days: u8) -> Self::WeatherFut<'a> {
        let result = self.with_state(|state| {
            if state.weather_outages > 0 {
                state.weather_outages -= 1;
                return Err(GatewayError::UpstreamUnavailable("forecast 503".to_string()));
            }
            Ok(WeatherContent(serde_json::json!({
                "latitude": coordinates.latitude,
                "days": days,
            })))
        });
        std::future::ready(result)
    }

    fn fetch_active_hazards<'a>(&'a self, coordinates: Coordinates) -> Self::HazardsFut<'a> {
        let result = self.with_state(|state| {
            state.hazard_calls += 1;
            let location = state.location_at(coordinates).unwrap_or_default();
            if state.failing_hazard_feeds.contains(&location) {
                return Err(GatewayError::UpstreamUnavailable("alerts 503".to_string()));
            }
            Ok(state.hazards.get(&location).cloned().unwrap_or_default())
        });
        std::future::ready(result)
    }
}

impl ports::Messenger for FakeGateway {
    type Fut<'a>
        = Ready<Result<(), GatewayError>>
    where
        Self: 'a;

    fn send_direct_message<'a>(
        &'a self,
        owner: &'a str,
        message: &'a DirectMessage,
    ) -> Self::Fut<'a> {
        let result = self.with_state(|state| {
            if state.blocked_owners.contains(owner) {
                return Err(GatewayError::DeliveryBlocked(owner.to_string()));
            }
            if let Some(remaining) = state.message_outages.get_mut(owner)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(GatewayError::UpstreamUnavailable("chat 502".to_string()));
            }
            state.sent.push((owner.to_string(), message.clone()));
            Ok(())
        });
        std::future::ready(result)
    }
}

pub(crate) fn create_temp_root(test_name: &str) -> PathBuf {
    let mut root = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    root.push(format!("wxnotify-{}-{}", test_name, nanos));
    std::fs::create_dir_all(&root).expect("create temp dir");
    root
}
