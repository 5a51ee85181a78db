use crate::commands::CommandError;
use crate::ports;
use crate::state;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use serde::Serialize;

mod alerts;
mod status;
mod subscriptions;

pub fn app<T, W>(state: state::AppState<T, W>) -> Router
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status::status::<T, W>))
        .route(
            "/api/subscriptions",
            post(subscriptions::create_subscription::<T, W>),
        )
        .route(
            "/api/owners/{owner}/subscriptions",
            get(subscriptions::list_subscriptions::<T, W>)
                .delete(subscriptions::remove_all::<T, W>),
        )
        .route(
            "/api/owners/{owner}/subscriptions/{id}",
            delete(subscriptions::delete_subscription::<T, W>),
        )
        .route(
            "/api/owners/{owner}/subscriptions/{id}/active",
            put(subscriptions::set_subscription_active::<T, W>),
        )
        .route(
            "/api/owners/{owner}/location",
            put(subscriptions::set_default_location::<T, W>),
        )
        .route(
            "/api/owners/{owner}/alerts",
            get(alerts::list_alert_watches::<T, W>).put(alerts::set_alert_watch::<T, W>),
        )
        .with_state(state)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

/// Command failure rendered as `{"error": ...}` with a matching status.
#[derive(Debug)]
pub(crate) struct ApiError(pub(crate) CommandError);

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CommandError::Validation(_) => StatusCode::BAD_REQUEST,
            CommandError::NotFoundOrNotOwner => StatusCode::NOT_FOUND,
            CommandError::LocationNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CommandError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            CommandError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "command failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
pub(crate) mod tests {
    use super::*;
    use crate::alerts::AlertStatus;
    use crate::commands::CommandService;
    use crate::delivery::DeliveryStatus;
    use crate::recurrence::resolve_zone;
    use crate::retry::RetryPolicy;
    use crate::store::{StoreError, SubscriptionStore};
    use crate::test_support::{FakeGateway, FixedTime};
    use crate::types::validation::ValidationError;
    use axum::body::Body;
    use axum::body::to_bytes;
    use axum::http::Request;
    use axum::http::header::CONTENT_TYPE;
    use serde_json::Value as JsonValue;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use time::macros::datetime;
    use tokio::sync::watch;
    use tower::ServiceExt;

    pub(crate) fn test_app() -> (Router, FakeGateway) {
        let gateway = FakeGateway::default();
        gateway.add_location("60614");
        let commands = CommandService::new(
            FixedTime::new(datetime!(2024-01-15 20:00 -6)),
            gateway.clone(),
            Arc::new(SubscriptionStore::in_memory()),
            resolve_zone("America/Chicago").expect("zone"),
            RetryPolicy {
                retries: 0,
                delay: Duration::from_millis(1),
                timeout: Duration::from_secs(1),
            },
        );
        let state = state::AppState {
            commands,
            delivery_status: watch::channel(DeliveryStatus::default()).1,
            alert_status: watch::channel(AlertStatus::default()).1,
        };
        (app(state), gateway)
    }

    pub(crate) async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, value)
    }

    #[tokio::test]
    async fn app__should_return_ok_on_health_endpoint() {
        // Given
        let (app, _) = test_app();

        // When
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"ok");
    }

    #[test]
    fn api_error__should_map_command_errors_to_status_codes() {
        let cases = [
            (
                CommandError::Validation(ValidationError::MissingWeekday),
                StatusCode::BAD_REQUEST,
            ),
            (CommandError::NotFoundOrNotOwner, StatusCode::NOT_FOUND),
            (
                CommandError::LocationNotFound("atlantis".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CommandError::UpstreamUnavailable("503".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CommandError::Store(StoreError::Poisoned),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError(error).into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn app__should_render_errors_as_json() {
        let (app, _) = test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/api/subscriptions",
            Some(json!({"owner": "ada", "location": "60614", "cadence": "weekly", "local_time": "07:30"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "weekly cadence requires a weekday");
    }
}
