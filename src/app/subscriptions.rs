use super::ApiError;
use crate::commands::{CreateSubscription, SubscriptionSummary};
use crate::ports;
use crate::state;
use crate::types::subscription::SubscriptionId;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

pub(crate) async fn create_subscription<T, W>(
    State(state): State<state::AppState<T, W>>,
    Json(request): Json<CreateSubscription>,
) -> Result<(StatusCode, Json<SubscriptionSummary>), ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    let summary = state.commands.create_subscription(request).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub(crate) async fn list_subscriptions<T, W>(
    State(state): State<state::AppState<T, W>>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<SubscriptionSummary>>, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    Ok(Json(state.commands.list_subscriptions(&owner)?))
}

pub(crate) async fn delete_subscription<T, W>(
    State(state): State<state::AppState<T, W>>,
    Path((owner, id)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    state
        .commands
        .delete_subscription(&owner, SubscriptionId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub(crate) struct RemoveAllResponse {
    pub(crate) removed: usize,
}

pub(crate) async fn remove_all<T, W>(
    State(state): State<state::AppState<T, W>>,
    Path(owner): Path<String>,
) -> Result<Json<RemoveAllResponse>, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    let removed = state.commands.remove_all(&owner)?;
    Ok(Json(RemoveAllResponse { removed }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetActiveRequest {
    pub(crate) active: bool,
}

pub(crate) async fn set_subscription_active<T, W>(
    State(state): State<state::AppState<T, W>>,
    Path((owner, id)): Path<(String, u64)>,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<SubscriptionSummary>, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    let summary =
        state
            .commands
            .set_subscription_active(&owner, SubscriptionId(id), request.active)?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DefaultLocation {
    pub(crate) location: String,
}

pub(crate) async fn set_default_location<T, W>(
    State(state): State<state::AppState<T, W>>,
    Path(owner): Path<String>,
    Json(request): Json<DefaultLocation>,
) -> Result<Json<DefaultLocation>, ApiError>
where
    T: ports::TimeProvider,
    W: ports::WeatherGateway,
{
    let location = state
        .commands
        .set_default_location(&owner, &request.location)
        .await?;
    Ok(Json(DefaultLocation { location }))
}
