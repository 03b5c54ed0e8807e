//! WebSocket connector built on `tokio-tungstenite`.
//!
//! One socket maps to one WebSocket stream split into a writer (guarded by
//! an async mutex so frames never interleave) and a reader task that forwards
//! text frames to the inbox. Ping/pong control frames are handled by
//! tungstenite; binary frames from the hub are ignored.

use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    log_debug,
    log_trace,
    log_warn,
    Connector,
    ConnectorPtr,
    Frame,
    HubError,
    Result,
    Socket,
    SocketHandle,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Create a WebSocket connector whose inboxes hold up to `inbox_capacity` frames.
pub fn create_websocket_connector(inbox_capacity: usize) -> ConnectorPtr {
    // ---
    Arc::new(WebSocketConnector {
        inbox_capacity: inbox_capacity.max(1),
    })
}

struct WebSocketConnector {
    inbox_capacity: usize,
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    // ---
    async fn connect(&self, url: &str) -> Result<SocketHandle> {
        // ---
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|err| HubError::ConnectionUnavailable(format!("{url}: {err}")))?;

        log_debug!("websocket open: {url}");

        let (writer, reader) = ws.split();
        let (inbox_tx, inbox_rx) = mpsc::channel(self.inbox_capacity);
        let closed = CancellationToken::new();

        tokio::spawn(read_loop(reader, inbox_tx, closed.clone()));

        Ok(SocketHandle {
            socket: Arc::new(WebSocketSocket {
                writer: Mutex::new(writer),
                closed,
            }),
            inbox: inbox_rx,
        })
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    inbox: mpsc::Sender<String>,
    closed: CancellationToken,
) {
    // ---
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = reader.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if inbox.send(text.as_str().to_owned()).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                log_debug!("websocket closed by hub: {frame:?}");
                break;
            }
            Some(Ok(Message::Binary(data))) => {
                log_trace!("ignoring {} byte binary frame from hub", data.len());
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                log_warn!("websocket read failed: {err}");
                break;
            }
            None => break,
        }
    }

    closed.cancel();
}

struct WebSocketSocket {
    // ---
    writer: Mutex<SplitSink<WsStream, Message>>,
    closed: CancellationToken,
}

#[async_trait::async_trait]
impl Socket for WebSocketSocket {
    // ---
    async fn send(&self, frame: Frame) -> Result<()> {
        // ---
        if self.closed.is_cancelled() {
            return Err(HubError::ConnectionLost);
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };

        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(|err| {
            log_debug!("websocket write failed: {err}");
            HubError::ConnectionLost
        })
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        let _ = writer.close().await;
        Ok(())
    }
}

impl Drop for WebSocketSocket {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}
