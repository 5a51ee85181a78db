use super::ApiError;
use crate::ports;
use crate::state;
use crate::types::alert::AlertWatch;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct AlertWatchRequest {
    #[serde(default)]
    pub(crate) location: Option<String>,
    pub(crate) min_severity: String,
    #[serde(default = "enabled_by_default")]
    pub(crate) enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

pub(crate) async fn list_alert_watches<T, W>(
    State(state): State<state::AppState<T, W>>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<AlertWatch>>, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    Ok(Json(state.commands.list_alert_watches(&owner)?))
}

pub(crate) async fn set_alert_watch<T, W>(
    State(state): State<state::AppState<T, W>>,
    Path(owner): Path<String>,
    Json(request): Json<AlertWatchRequest>,
) -> Result<Json<AlertWatch>, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    let watch = state.commands.set_alert_watch(
        &owner,
        request.location.as_deref(),
        &request.min_severity,
        request.enabled,
    )?;
    Ok(Json(watch))
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::app::tests::{send, test_app};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn set_alert_watch__should_upsert_and_list() {
        // Given
        let (app, _) = test_app();
        send(
            &app,
            "PUT",
            "/api/owners/ada/alerts",
            Some(json!({"location": "60614", "min_severity": "advisory"})),
        )
        .await;

        // When
        let (status, body) = send(
            &app,
            "PUT",
            "/api/owners/ada/alerts",
            Some(json!({"location": "60614", "min_severity": "warning", "enabled": false})),
        )
        .await;
        let (_, listed) = send(&app, "GET", "/api/owners/ada/alerts", None).await;

        // Then
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["min_severity"], "warning");
        assert_eq!(body["enabled"], false);
        assert_eq!(listed.as_array().expect("array").len(), 1);
    }

    #[tokio::test]
    async fn set_alert_watch__should_reject_unknown_severity() {
        let (app, _) = test_app();

        let (status, body) = send(
            &app,
            "PUT",
            "/api/owners/ada/alerts",
            Some(json!({"location": "60614", "min_severity": "doom"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("doom"));
    }
}
