use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::state::{SharedState, SyncEvent};

/// Subscribe to every sync message the node sends or applies.
pub fn subscribe(state: &SharedState) -> broadcast::Receiver<SyncEvent> {
    state.events().subscribe()
}

/// Encode one sync event; the SSE event name is the message type.
pub fn to_event(event: &SyncEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().event(event.envelope.message.kind()).data(data)),
        Err(err) => {
            warn!(error = %err, "failed to encode sync event for SSE");
            None
        }
    }
}

/// Convert a hub receiver into an SSE response, forwarding events until the
/// client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<SyncEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => match recv_result {
                    Ok(event) => {
                        let Some(event) = to_event(&event) else { continue };
                        if tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "SSE subscriber lagging; events dropped");
                    }
                },
            }
        }
        info!("SSE stream disconnected");
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dto::messages::{Envelope, SyncMessage},
        state::{EventDirection, SseHub},
    };

    #[tokio::test]
    async fn hub_events_reach_subscribers_in_order() {
        let hub = SseHub::new(8);
        let mut receiver = hub.subscribe();

        hub.broadcast(EventDirection::Sent, Envelope::new(SyncMessage::NoMoreBets));
        hub.broadcast(
            EventDirection::Applied,
            Envelope::new(SyncMessage::RequestState {
                client_id: "session_1_abc".into(),
            }),
        );

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.direction, EventDirection::Sent);
        assert_eq!(first.envelope.message.kind(), "no_more_bets");
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.direction, EventDirection::Applied);
        assert!(to_event(&second).is_some());
    }
}
