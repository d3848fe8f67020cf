//! WebSocket relay letting a remote display join the node's broadcast channel.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dto::{messages::Envelope, now_millis},
    error::ServiceError,
    state::SharedState,
    transport::{Subscription, SyncChannel},
};

/// Endpoint opened for one remote display before the upgrade completes.
pub struct RelayEndpoint {
    channel: SyncChannel,
    subscription: Subscription,
}

/// Open a channel endpoint for a new remote display.
pub fn open_relay(state: &SharedState) -> Result<RelayEndpoint, ServiceError> {
    let channel = state.channel_factory().open();
    let subscription = channel.subscribe().inspect_err(|_| channel.close())?;
    Ok(RelayEndpoint {
        channel,
        subscription,
    })
}

/// Relay frames both ways until either side goes away.
pub async fn handle_socket(relay: RelayEndpoint, socket: WebSocket) {
    let RelayEndpoint {
        channel,
        mut subscription,
    } = relay;
    let origin = channel.origin().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    info!(origin = %origin, "remote display joined");

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let forward_tx = outbound_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(envelope) = subscription.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(text) => {
                    if forward_tx.send(Message::Text(text.into())).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to encode relayed envelope"),
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(err) = relay_frame(&channel, text.as_str()).await {
                    warn!(origin = %origin, error = %err, "dropping frame from remote display");
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => debug!(origin = %origin, "ignoring non-text frame"),
            Err(err) => {
                warn!(origin = %origin, error = %err, "websocket receive error");
                break;
            }
        }
    }

    forward_task.abort();
    channel.close();
    finalize(writer_task, outbound_tx).await;
    info!(origin = %origin, "remote display left");
}

/// Publish one text frame from a remote display on the channel.
pub async fn relay_frame(channel: &SyncChannel, text: &str) -> Result<(), ServiceError> {
    let mut envelope = Envelope::from_json_str(text)
        .map_err(|err| ServiceError::InvalidInput(format!("malformed envelope: {err}")))?;
    envelope
        .message
        .validate()
        .map_err(|err| ServiceError::InvalidInput(format!("validation failed: {err}")))?;
    if envelope.timestamp == 0 {
        envelope.timestamp = now_millis();
    }
    channel.send_envelope(envelope).await;
    Ok(())
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        dto::messages::SyncMessage,
        transport::{ChannelFactory, native::NativeRegistry, storage::MemoryStorage},
    };

    fn factory() -> ChannelFactory {
        ChannelFactory::new(
            Arc::new(NativeRegistry::new()),
            Arc::new(MemoryStorage::new()),
            AppConfig::default().transport_settings(),
        )
    }

    #[tokio::test]
    async fn relayed_frames_reach_other_endpoints() {
        let factory = factory();
        let relay = factory.open();
        let node = factory.open();
        let mut inbox = node.subscribe().unwrap();

        relay_frame(&relay, r#"{"type":"request_state","clientId":"session_1_abc"}"#)
            .await
            .unwrap();

        let envelope = timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            envelope.message,
            SyncMessage::RequestState {
                client_id: "session_1_abc".into()
            }
        );
        assert!(envelope.timestamp > 0);
        assert_eq!(envelope.origin.as_deref(), Some(relay.origin()));
    }

    #[tokio::test]
    async fn malformed_and_invalid_frames_are_rejected() {
        let relay = factory().open();

        let err = relay_frame(&relay, "not json").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = relay_frame(
            &relay,
            r#"{"type":"spin_result","winningNumber":99,"color":"red"}"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
