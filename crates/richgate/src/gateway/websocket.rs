//! WebSocket channel built on tokio-tungstenite.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::channel::{ChannelCommand, ChannelEvent, ChannelHandle, ChannelPeer, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default limit on the TCP/TLS/WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket channels.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    /// Create a connector with the default handshake timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str) -> ChannelHandle {
        let (handle, peer) = ChannelHandle::pair();
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            run_channel(url, peer, connect_timeout).await;
        });

        handle
    }
}

async fn run_channel(url: String, peer: ChannelPeer, connect_timeout: Duration) {
    let ChannelPeer {
        events,
        mut outbound,
    } = peer;

    debug!(url = %url, "opening websocket");

    // Nothing is sent before Opened, so any command here means the session gave up on us.
    let connected = tokio::select! {
        result = timeout(connect_timeout, connect_async(url.as_str())) => result,
        _ = outbound.recv() => {
            debug!(url = %url, "websocket open aborted");
            return;
        }
    };

    let ws_stream = match connected {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            let _ = events.send(ChannelEvent::Error(format!("failed to connect: {e}"))).await;
            return;
        }
        Err(_) => {
            let _ = events
                .send(ChannelEvent::Error("connection timeout".to_string()))
                .await;
            return;
        }
    };

    if events.send(ChannelEvent::Opened).await.is_err() {
        return;
    }

    let (write, read) = ws_stream.split();
    tokio::join!(
        reader_task(read, events),
        writer_task(write, outbound),
    );
}

async fn reader_task(mut read: SplitStream<WsStream>, tx: tokio::sync::mpsc::Sender<ChannelEvent>) {
    loop {
        let event = match read.next().await {
            Some(Ok(Message::Text(text))) => ChannelEvent::Frame(text.as_str().to_owned()),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => ChannelEvent::Frame(text),
                Err(_) => {
                    warn!("dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                });
                let _ = tx.send(ChannelEvent::Closed { code, reason }).await;
                break;
            }
            Some(Ok(_)) => {
                // Ping/Pong are handled by tungstenite
                continue;
            }
            Some(Err(e)) => {
                let _ = tx.send(ChannelEvent::Error(e.to_string())).await;
                break;
            }
            None => {
                let _ = tx
                    .send(ChannelEvent::Closed {
                        code: None,
                        reason: "connection closed".to_string(),
                    })
                    .await;
                break;
            }
        };

        if tx.send(event).await.is_err() {
            break;
        }
    }
}

async fn writer_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: tokio::sync::mpsc::Receiver<ChannelCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            ChannelCommand::Frame(text) => {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!(error = %e, "websocket write failed");
                    return;
                }
            }
            ChannelCommand::Close => break,
        }
    }

    let _ = write.send(Message::Close(None)).await;
    let _ = write.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_timeout() {
        let connector = WsConnector::new().with_connect_timeout(Duration::from_secs(3));
        assert_eq!(connector.connect_timeout, Duration::from_secs(3));
        assert_eq!(WsConnector::default().connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        let connector = WsConnector::new().with_connect_timeout(Duration::from_secs(2));
        // Port 9 (discard) on localhost is expected to refuse.
        let mut handle = connector.open("ws://127.0.0.1:9");

        let event = tokio::time::timeout(Duration::from_secs(3), handle.events.recv())
            .await
            .expect("timeout waiting for channel event")
            .expect("channel closed");
        assert!(matches!(event, ChannelEvent::Error(_)));
    }
}
