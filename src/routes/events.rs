use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::services::subscription_router::{SessionId, SubscriptionMessage};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsContextQuery {
    pub organization: Option<Uuid>,
}

/// Change feed for one scope: the caller's personal space, or the given
/// organization. One live stream per session; opening this endpoint
/// again replaces the previous stream. A `revoked` event is terminal.
pub async fn subscribe_events(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Query(params): Query<EventsContextQuery>,
) -> Response {
    let user_id = match Uuid::parse_str(&claims.id) {
        Ok(id) => id,
        Err(_) => return JsonResponse::unauthorized("Invalid user ID").into_response(),
    };
    let session = match Uuid::parse_str(&claims.sid) {
        Ok(id) => SessionId(id),
        Err(_) => return JsonResponse::unauthorized("Invalid session ID").into_response(),
    };

    match app_state
        .subscriptions
        .subscribe(session, user_id, params.organization)
        .await
    {
        Ok(stream) => {
            let s = stream.map(|msg| {
                let name = match &msg {
                    SubscriptionMessage::Change(_) => "change",
                    SubscriptionMessage::ScopeRevoked => "revoked",
                };
                let ev = Event::default()
                    .event(name)
                    .json_data(&msg)
                    .unwrap_or_else(|_| Event::default().event("error").data("serialization_failed"));
                Ok::<Event, Infallible>(ev)
            });
            Sse::new(s)
                .keep_alive(
                    KeepAlive::new()
                        .interval(Duration::from_secs(10))
                        .text("keepalive"),
                )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}
