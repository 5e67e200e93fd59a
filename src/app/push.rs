use crate::app::ApiError;
use crate::push::{Created, vapid};
use crate::state;
use crate::types::push::{NewNotification, NotificationId, NotificationSummary, Subscription};

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub(crate) async fn public_signing_key(State(state): State<state::AppState>) -> Response {
    (
        [(CONTENT_TYPE, "application/octet-stream")],
        state.push.public_key().to_vec(),
    )
        .into_response()
}

fn parse_subscription(
    payload: Result<Json<Subscription>, JsonRejection>,
) -> Result<Subscription, ApiError> {
    let Json(subscription) =
        payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    vapid::audience(&subscription.endpoint)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    Ok(subscription)
}

pub(crate) async fn is_subscribed(
    State(state): State<state::AppState>,
    payload: Result<Json<Subscription>, JsonRejection>,
) -> Result<Json<bool>, ApiError> {
    let subscription = parse_subscription(payload)?;
    Ok(Json(state.push.is_subscribed(&subscription.endpoint).await?))
}

pub(crate) async fn subscribe(
    State(state): State<state::AppState>,
    payload: Result<Json<Subscription>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let subscription = parse_subscription(payload)?;
    state.push.subscribe(&subscription).await?;
    Ok(StatusCode::CREATED)
}

pub(crate) async fn unsubscribe(
    State(state): State<state::AppState>,
    payload: Result<Json<Subscription>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let subscription = parse_subscription(payload)?;
    state.push.unsubscribe(&subscription.endpoint).await?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
pub(crate) struct SubscriberCountResponse {
    pub(crate) subscribers: usize,
}

pub(crate) async fn subscriber_count(
    State(state): State<state::AppState>,
) -> Result<Json<SubscriberCountResponse>, ApiError> {
    Ok(Json(SubscriberCountResponse {
        subscribers: state.push.subscriber_count().await?,
    }))
}

pub(crate) async fn create_notification(
    State(state): State<state::AppState>,
    payload: Result<Json<NewNotification>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(notification) =
        payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    // Immediate sends keep going after the response is out.
    let response = match state.push.create_notification(notification).await? {
        Created::Scheduled(stored) => (StatusCode::ACCEPTED, Json(stored)).into_response(),
        Created::Sending(_) => StatusCode::ACCEPTED.into_response(),
    };
    Ok(response)
}

pub(crate) async fn list_notifications(
    State(state): State<state::AppState>,
) -> Result<Json<Vec<NotificationSummary>>, ApiError> {
    Ok(Json(state.push.notifications().await?))
}

pub(crate) async fn delete_notification(
    State(state): State<state::AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state
        .push
        .delete_notification(NotificationId(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
