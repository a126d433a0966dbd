//! The change-event stream.
//!
//! `GET /events` holds a long-lived SSE connection delivering one message
//! per change tag, plus comment heartbeats so intermediaries and the
//! broadcaster can reap dead connections. Delivery is best-effort: a
//! subscriber that stops reading is dropped by the broadcaster once its
//! queue fills.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use tracing::debug;

use waypoint_core::UserId;

use crate::app::AppState;
use crate::auth::CurrentUser;

/// Heartbeat period; stale connections die within this bound.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// Create the events router.
pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}

async fn event_stream(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe(UserId::from_uuid(user.id));
    debug!(user_id = %user.id, subscriber = subscription.id(), "Event stream opened");

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        subscription.recv().await.map(|tag| {
            let event = Event::default().event("change").data(tag.as_str());
            (Ok::<_, Infallible>(event), subscription)
        })
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}
