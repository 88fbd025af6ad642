//! Server-sent progress notifications.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use tokio::sync::broadcast;
use tracing::warn;

use crate::orchestrator::{Orchestrator, Requester};
use crate::state::ProgressEvent;

/// Stream progress events for the requester's tasks (every task when
/// elevated).
pub async fn task_events(
    State(orchestrator): State<Orchestrator>,
    requester: Requester,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let receiver = orchestrator.state().subscribe();
    Sse::new(event_stream(receiver, requester)).keep_alive(KeepAlive::default())
}

fn event_stream(
    receiver: broadcast::Receiver<ProgressEvent>,
    requester: Requester,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(
        (receiver, requester),
        |(mut receiver, requester)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if !requester.elevated && event.owner() != requester.name {
                            continue;
                        }
                        return Some((Ok(to_sse(&event)), (receiver, requester)));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Progress stream lagged, skipping events");
                        let comment = Event::default().comment(format!("skipped {} events", n));
                        return Some((Ok(comment), (receiver, requester)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    )
}

fn to_sse(event: &ProgressEvent) -> Event {
    let name = match event {
        ProgressEvent::TaskCreated { .. } => "task_created",
        ProgressEvent::TaskStatusChanged { .. } => "task_status_changed",
        ProgressEvent::ItemStatusChanged { .. } => "item_status_changed",
        ProgressEvent::ProgressUpdated { .. } => "progress_updated",
        ProgressEvent::CancelRequested { .. } => "cancel_requested",
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse) => sse,
        Err(e) => Event::default().comment(format!("unserializable event: {}", e)),
    }
}
