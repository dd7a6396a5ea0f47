//! Socket transport
//!
//! A [`Transport`] turns an address into a [`SocketHandle`] and reports what
//! happens to that socket through [`TransportEvents`]. The production
//! implementation is [`WsTransport`], built on tokio-tungstenite.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::driver::Command;
use super::error::{LinkError, LinkResult};
use super::machine::LinkEvent;
use super::state::HandleId;

/// How long a connection attempt may take before it counts as failed
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An open (or opening) socket owned by the link
pub trait SocketHandle: Send {
    fn send_text(&self, text: String) -> LinkResult<()>;

    /// Start a graceful close; further sends fail
    fn close(&mut self);
}

/// Creates sockets
pub trait Transport: Send + Sync {
    /// Begin connecting to `url`
    ///
    /// Returns as soon as the handle exists; the outcome of the connection
    /// attempt arrives through `events`.
    fn open(&self, url: &str, events: TransportEvents) -> LinkResult<Box<dyn SocketHandle>>;
}

/// Reports socket activity back to the link that owns the handle
#[derive(Debug, Clone)]
pub struct TransportEvents {
    handle: HandleId,
    mailbox: mpsc::WeakUnboundedSender<Command>,
}

impl TransportEvents {
    pub(crate) fn new(handle: HandleId, mailbox: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self { handle, mailbox }
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn opened(&self) {
        self.emit(LinkEvent::Opened {
            handle: self.handle,
        });
    }

    pub fn message(&self, payload: impl Into<String>) {
        self.emit(LinkEvent::Message {
            handle: self.handle,
            payload: payload.into(),
            received_at: Utc::now(),
        });
    }

    pub fn closed(&self, clean: bool, code: Option<u16>, reason: Option<String>) {
        self.emit(LinkEvent::Closed {
            handle: self.handle,
            clean,
            code,
            reason,
        });
    }

    pub fn error(&self, error: LinkError) {
        self.emit(LinkEvent::TransportError {
            handle: self.handle,
            error,
        });
    }

    fn emit(&self, event: LinkEvent) {
        match self.mailbox.upgrade() {
            Some(sender) => {
                if sender.send(Command::Event(event)).is_err() {
                    tracing::trace!(handle = %self.handle, "Link stopped; socket event dropped");
                }
            }
            None => tracing::trace!(handle = %self.handle, "Link stopped; socket event dropped"),
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// WebSocket transport over tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    connect_timeout: Option<Duration>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Some(CONNECT_TIMEOUT),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, events: TransportEvents) -> LinkResult<Box<dyn SocketHandle>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LinkError::TransportFailure(format!("no async runtime: {}", e)))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_socket(
            url.to_string(),
            self.connect_timeout.unwrap_or(CONNECT_TIMEOUT),
            events,
            outbound_rx,
        ));

        Ok(Box::new(WsSocket {
            outbound: outbound_tx,
            closing: false,
        }))
    }
}

/// Handle side of a [`WsTransport`] socket
struct WsSocket {
    outbound: mpsc::UnboundedSender<Outbound>,
    closing: bool,
}

impl SocketHandle for WsSocket {
    fn send_text(&self, text: String) -> LinkResult<()> {
        if self.closing {
            return Err(LinkError::TransportFailure("socket is closing".to_string()));
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| LinkError::TransportFailure("socket task has ended".to_string()))
    }

    fn close(&mut self) {
        if !self.closing {
            self.closing = true;
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    url: String,
    connect_timeout: Duration,
    events: TransportEvents,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let handle = events.handle();
    let connecting = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    tokio::pin!(connecting);

    let stream = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(err)) => {
                    tracing::debug!(%handle, error = %err, "WebSocket connect failed");
                    events.error(LinkError::TransportFailure(err.to_string()));
                    events.closed(false, None, None);
                    return;
                }
                Err(_) => {
                    tracing::debug!(%handle, ?connect_timeout, "WebSocket connect timed out");
                    events.error(LinkError::TransportFailure(format!(
                        "connect timed out after {:?}",
                        connect_timeout
                    )));
                    events.closed(false, None, None);
                    return;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(_)) => {
                    tracing::debug!(%handle, "Dropping frame queued before the socket opened");
                }
                Some(Outbound::Close) | None => {
                    tracing::debug!(%handle, "Socket closed before it opened");
                    return;
                }
            },
        }
    };

    events.opened();
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => events.message(text),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), Some(frame.reason.to_string())),
                        None => (None, None),
                    };
                    tracing::debug!(%handle, ?code, "Peer closed WebSocket");
                    // Writes the close reply tungstenite queued while reading
                    let _ = write.flush().await;
                    events.closed(true, code, reason);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    events.error(LinkError::TransportFailure(err.to_string()));
                    events.closed(false, None, None);
                    return;
                }
                None => {
                    events.closed(false, None, None);
                    return;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = write.send(Message::Text(text)).await {
                        events.error(LinkError::TransportFailure(err.to_string()));
                        events.closed(false, None, None);
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    events.closed(true, Some(1000), None);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Command>) -> LinkEvent {
        let command = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for socket event")
            .expect("mailbox closed");
        match command {
            Command::Event(event) => event,
            _ => panic!("unexpected command"),
        }
    }

    #[tokio::test]
    async fn test_receives_messages_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(r#"{"id":"s1"}"#.to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(HandleId(1), tx.downgrade());
        let _socket = WsTransport::new()
            .open(&format!("ws://{}/ws", addr), events)
            .unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            LinkEvent::Opened { handle: HandleId(1) }
        ));
        match next_event(&mut rx).await {
            LinkEvent::Message { payload, .. } => assert_eq!(payload, r#"{"id":"s1"}"#),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            LinkEvent::Closed { clean: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_peer_close_is_answered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.close(None).await.unwrap();
            let reply = ws.next().await;
            let _ = reply_tx.send(matches!(reply, Some(Ok(Message::Close(_)))));
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(HandleId(4), tx.downgrade());
        let _socket = WsTransport::new()
            .open(&format!("ws://{}/ws", addr), events)
            .unwrap();

        assert!(matches!(next_event(&mut rx).await, LinkEvent::Opened { .. }));
        assert!(matches!(
            next_event(&mut rx).await,
            LinkEvent::Closed { clean: true, .. }
        ));
        let answered = tokio::time::timeout(Duration::from_secs(5), reply_rx)
            .await
            .expect("server never saw the close reply")
            .unwrap();
        assert!(answered);
    }

    #[tokio::test]
    async fn test_refused_connection_is_abnormal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(HandleId(7), tx.downgrade());
        let _socket = WsTransport::new()
            .open(&format!("ws://{}/ws", addr), events)
            .unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            LinkEvent::TransportError { handle: HandleId(7), .. }
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            LinkEvent::Closed { clean: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(HandleId(2), tx.downgrade());
        let mut socket = WsTransport::new()
            .with_connect_timeout(Duration::from_millis(50))
            .open("ws://127.0.0.1:9/ws", events)
            .unwrap();

        socket.close();
        assert!(matches!(
            socket.send_text("{}".to_string()),
            Err(LinkError::TransportFailure(_))
        ));
    }

    #[test]
    fn test_open_requires_runtime() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(HandleId(3), tx.downgrade());
        let result = WsTransport::new().open("ws://localhost:1/ws", events);
        assert!(matches!(result, Err(LinkError::TransportFailure(_))));
    }
}
