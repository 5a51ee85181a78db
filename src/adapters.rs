use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::ports;
use crate::ports::gateway::{Coordinates, DirectMessage, GatewayError, WeatherContent};
use crate::types::alert::{Hazard, Severity};

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl ports::TimeProvider for TokioTimeProvider {
    type Sleep<'a>
        = tokio::time::Sleep
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Resolve,
    Forecast,
    Hazards,
    Messages,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Forecast => "forecast",
            Self::Hazards => "hazards",
            Self::Messages => "messages",
        }
    }
}

/// Maps a non-success status to the gateway taxonomy. `subject` names the
/// location or recipient the call was about.
fn classify_status(endpoint: Endpoint, status: StatusCode, subject: &str) -> GatewayError {
    match (endpoint, status) {
        (Endpoint::Resolve, StatusCode::NOT_FOUND) => {
            GatewayError::LocationNotFound(subject.to_string())
        }
        (Endpoint::Messages, StatusCode::FORBIDDEN | StatusCode::GONE) => {
            GatewayError::DeliveryBlocked(format!("{subject}: {status}"))
        }
        _ => GatewayError::UpstreamUnavailable(format!("{} returned {status}", endpoint.path())),
    }
}

#[derive(Debug, Serialize)]
struct ResolveRequest<'a> {
    location: &'a str,
}

#[derive(Debug, Serialize)]
struct ForecastRequest {
    latitude: f64,
    longitude: f64,
    days: u8,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    owner: &'a str,
    message: &'a DirectMessage,
}

/// Hazard as reported by the feed; severity is a free-form label.
#[derive(Debug, Deserialize)]
struct UpstreamHazard {
    id: String,
    #[serde(default)]
    severity: String,
    #[serde(default, alias = "headline")]
    text: String,
}

impl From<UpstreamHazard> for Hazard {
    fn from(upstream: UpstreamHazard) -> Self {
        Self {
            id: upstream.id.trim().to_string(),
            severity: Severity::from_upstream_label(&upstream.severity),
            text: upstream.text,
        }
    }
}

/// Dispatch gateway backed by the bot sidecar's JSON endpoints.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        subject: &str,
        body: &B,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut request = self.client.post(self.url(endpoint)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            GatewayError::UpstreamUnavailable(format!("{}: {err}", endpoint.path()))
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error = classify_status(endpoint, status, subject);
        if error.is_transient() {
            tracing::warn!(endpoint = endpoint.path(), %status, "gateway call failed");
        }
        Err(error)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        subject: &str,
        body: &B,
    ) -> Result<R, GatewayError> {
        self.post(endpoint, subject, body)
            .await?
            .json::<R>()
            .await
            .map_err(|err| {
                GatewayError::UpstreamUnavailable(format!(
                    "{} returned an unreadable body: {err}",
                    endpoint.path()
                ))
            })
    }
}

impl ports::WeatherGateway for HttpGateway {
    type ResolveFut<'a>
        = Pin<Box<dyn Future<Output = Result<Coordinates, GatewayError>> + Send + 'a>>
    where
        Self: 'a;
    type WeatherFut<'a>
        = Pin<Box<dyn Future<Output = Result<WeatherContent, GatewayError>> + Send + 'a>>
    where
        Self: 'a;
    type HazardsFut<'a>
        = Pin<Box<dyn Future<Output = Result<Vec<Hazard>, GatewayError>> + Send + 'a>>
    where
        Self: 'a;

    fn resolve_location<'a>(&'a self, location: &'a str) -> Self::ResolveFut<'a> {
        Box::pin(async move {
            self.post_json(Endpoint::Resolve, location, &ResolveRequest { location })
                .await
        })
    }

    fn fetch_weather<'a>(&'a self, coordinates: Coordinates, days: u8) -> Self::WeatherFut<'a> {
        Box::pin(async move {
            let request = ForecastRequest {
                latitude: coordinates.latitude,
                longitude: coordinates.longitude,
                days,
            };
            self.post_json(Endpoint::Forecast, "forecast", &request)
                .await
        })
    }

    fn fetch_active_hazards<'a>(&'a self, coordinates: Coordinates) -> Self::HazardsFut<'a> {
        Box::pin(async move {
            let hazards: Vec<UpstreamHazard> = self
                .post_json(Endpoint::Hazards, "hazards", &coordinates)
                .await?;
            Ok(hazards.into_iter().map(Hazard::from).collect())
        })
    }
}

impl ports::Messenger for HttpGateway {
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>>
    where
        Self: 'a;

    fn send_direct_message<'a>(
        &'a self,
        owner: &'a str,
        message: &'a DirectMessage,
    ) -> Self::Fut<'a> {
        Box::pin(async move {
            self.post(Endpoint::Messages, owner, &MessageRequest { owner, message })
                .await?;
            Ok(())
        })
    }
}
