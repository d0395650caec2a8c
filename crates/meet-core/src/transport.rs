use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::errors::MeetError;

/// Channel-level event delivered to the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// The channel closed. `clean` is true when the peer completed the
    /// closing handshake.
    Closed { clean: bool },
    /// Channel-level error. The channel is dead after this.
    Error(String),
}

/// Handles to one live channel: a sender for outbound text frames and a
/// receiver for inbound events. Dropping the sender closes the channel.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Seam over the WebSocket-like channel so the connection manager can be
/// driven by a scripted transport in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportLink, MeetError>;
}

/// Production transport over tokio-tungstenite.
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink, MeetError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| MeetError::Transport(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Writer: forwards outbound frames until the sender side is dropped,
        // then completes the closing handshake.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: maps incoming frames to transport events.
        tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx
                            .send(TransportEvent::Message(text.to_string()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        let _ = event_tx.send(TransportEvent::Closed { clean: true });
                        break;
                    }
                    Some(Ok(other)) => {
                        tracing::debug!("ignoring non-text frame: {other:?}");
                    }
                    Some(Err(e)) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = event_tx.send(TransportEvent::Closed { clean: false });
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            outbound: out_tx,
            events: event_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Loopback round trip against a real tungstenite acceptor.
    #[tokio::test]
    async fn ws_transport_round_trip_and_clean_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let echoed = match ws.next().await {
                Some(Ok(Message::Text(text))) => text.to_string(),
                other => panic!("expected text frame, got {other:?}"),
            };
            ws.send(Message::Text(echoed.into())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut link = WsTransport
            .connect(&format!("ws://{addr}"))
            .await
            .unwrap();

        link.outbound.send(r#"{"type":"ping"}"#.to_string()).unwrap();

        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Message(r#"{"type":"ping"}"#.to_string()))
        );
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Closed { clean: true })
        );

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_maps_to_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WsTransport
            .connect(&format!("ws://{addr}"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeetError::Transport(_)));
    }
}
