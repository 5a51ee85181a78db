use super::ApiError;
use crate::alerts::AlertStatus;
use crate::delivery::DeliveryStatus;
use crate::ports;
use crate::state;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use time_tz::TimeZone;

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub(crate) zone: &'static str,
    pub(crate) delivery: DeliveryStatus,
    pub(crate) alerts: AlertStatus,
    pub(crate) quarantined: usize,
}

pub(crate) async fn status<T, W>(
    State(state): State<state::AppState<T, W>>,
) -> Result<Json<StatusResponse>, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    let quarantined = state
        .commands
        .store()
        .quarantined()
        .map_err(|err| ApiError(err.into()))?
        .len();
    Ok(Json(StatusResponse {
        zone: state.commands.zone().name(),
        delivery: state.delivery_status.borrow().clone(),
        alerts: state.alert_status.borrow().clone(),
        quarantined,
    }))
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::app::tests::{send, test_app};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn status__should_report_phases_and_quarantine() {
        let (app, _) = test_app();

        let (status, body) = send(&app, "GET", "/api/status", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["zone"], "America/Chicago");
        assert_eq!(body["delivery"]["phase"]["state"], "idle");
        assert_eq!(body["alerts"]["running"], false);
        assert_eq!(body["quarantined"], 0);
    }
}
