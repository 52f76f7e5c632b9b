//! WebSocket endpoint that enrolls browsers into the [`Broadcaster`].
//!
//! Each connection moves through `Connecting → Registered → Closed | Failed`.
//! While registered, the task waits on two things at once: reload signals to
//! push, and frames from the peer. The peer never sends anything meaningful,
//! so the receive side exists only to notice when the browser goes away. That
//! read is how disconnects are detected; it must not be removed.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::timeout;
use tracing::debug;

use crate::broadcast::Broadcaster;

/// Lifecycle of one reload connection. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Registered,
    Closed,
    Failed,
}

/// Shared state behind the reload route.
#[derive(Debug)]
pub struct ReloadEndpoint {
    broadcaster: Arc<Broadcaster>,
    send_timeout: Duration,
}

impl ReloadEndpoint {
    pub fn new(broadcaster: Arc<Broadcaster>, send_timeout: Duration) -> Self {
        Self { broadcaster, send_timeout }
    }

    /// Run one client from registration until it closes or fails.
    ///
    /// `socket` is normally an upgraded axum `WebSocket`; any duplex of
    /// messages will do.
    pub async fn serve_client<S>(&self, mut socket: S) -> ClientState
    where
        S: Sink<Message> + Stream<Item = Result<Message, axum::Error>> + Unpin,
        S::Error: Display,
    {
        let mut subscription = self.broadcaster.register();
        let id = subscription.id();
        debug!(client = %id, state = ?ClientState::Registered, "reload client");

        let (state, reason) = loop {
            tokio::select! {
                signal = subscription.recv() => {
                    let Some(signal) = signal else {
                        // Pruned as stalled, or the server is shutting down.
                        let _ = timeout(self.send_timeout, socket.send(Message::Close(None))).await;
                        break (ClientState::Closed, "released by server".to_string());
                    };
                    let frame = Message::Text(signal.as_str().to_owned().into());
                    match timeout(self.send_timeout, socket.send(frame)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break (ClientState::Failed, format!("send failed: {e}")),
                        Err(_) => break (ClientState::Failed, "send timed out".to_string()),
                    }
                }
                msg = socket.next() => match msg {
                    None | Some(Ok(Message::Close(_))) => {
                        break (ClientState::Closed, "peer closed".to_string());
                    }
                    Some(Err(e)) => break (ClientState::Failed, format!("receive failed: {e}")),
                    // Anything the browser sends is ignored.
                    Some(Ok(_)) => {}
                }
            }
        };

        self.broadcaster.unregister(id);
        debug!(client = %id, ?state, reason = %reason, "reload client");
        state
    }
}

/// `GET <reload_path>`: upgrade and hand the socket to [`ReloadEndpoint`].
pub async fn reload_socket(
    ws: WebSocketUpgrade,
    State(endpoint): State<Arc<ReloadEndpoint>>,
) -> impl IntoResponse {
    debug!(state = ?ClientState::Connecting, "reload client");
    ws.on_upgrade(move |socket| async move {
        endpoint.serve_client(socket).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::sync::mpsc;

    /// In-memory peer that records what it is sent. A stuck peer never
    /// accepts a frame, like a browser that stopped reading.
    struct Peer {
        sent: Arc<Mutex<Vec<Message>>>,
        incoming: mpsc::UnboundedReceiver<Message>,
        stuck: bool,
    }

    impl Sink<Message> for Peer {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            if self.stuck { Poll::Pending } else { Poll::Ready(Ok(())) }
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Infallible> {
            self.sent.lock().unwrap().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Stream for Peer {
        type Item = Result<Message, axum::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.incoming.poll_recv(cx).map(|msg| msg.map(Ok))
        }
    }

    fn peer(stuck: bool) -> (Peer, Arc<Mutex<Vec<Message>>>, mpsc::UnboundedSender<Message>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (tx, incoming) = mpsc::unbounded_channel();
        (Peer { sent: Arc::clone(&sent), incoming, stuck }, sent, tx)
    }

    fn endpoint(hub: &Arc<Broadcaster>, send_timeout: Duration) -> Arc<ReloadEndpoint> {
        Arc::new(ReloadEndpoint::new(Arc::clone(hub), send_timeout))
    }

    async fn wait_registered(hub: &Broadcaster) {
        while hub.is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn reload_is_pushed_as_text() {
        let hub = Arc::new(Broadcaster::default());
        let endpoint = endpoint(&hub, Duration::from_secs(1));
        let (socket, sent, browser) = peer(false);
        let task = tokio::spawn(async move { endpoint.serve_client(socket).await });

        wait_registered(&hub).await;
        assert_eq!(hub.broadcast_reload().delivered, 1);
        while sent.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        browser.send(Message::Close(None)).unwrap();
        assert_eq!(task.await.unwrap(), ClientState::Closed);
        assert!(hub.is_empty());
        let sent = sent.lock().unwrap();
        assert!(matches!(&sent[..], [Message::Text(t)] if t.as_str() == "reload"), "{sent:?}");
    }

    #[tokio::test]
    async fn peer_going_away_unregisters() {
        let hub = Arc::new(Broadcaster::default());
        let endpoint = endpoint(&hub, Duration::from_secs(1));
        let (socket, _sent, browser) = peer(false);
        let task = tokio::spawn(async move { endpoint.serve_client(socket).await });

        wait_registered(&hub).await;
        drop(browser);
        assert_eq!(task.await.unwrap(), ClientState::Closed);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn stuck_peer_fails_on_send_timeout() {
        let hub = Arc::new(Broadcaster::default());
        let endpoint = endpoint(&hub, Duration::from_millis(50));
        let (socket, sent, _browser) = peer(true);
        let task = tokio::spawn(async move { endpoint.serve_client(socket).await });

        wait_registered(&hub).await;
        hub.broadcast_reload();

        let state = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(state, ClientState::Failed);
        assert!(hub.is_empty());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pruned_client_is_closed_without_queued_reloads() {
        let hub = Arc::new(Broadcaster::new(1));
        let endpoint = endpoint(&hub, Duration::from_secs(1));
        let (socket, sent, _browser) = peer(false);
        let task = tokio::spawn(async move { endpoint.serve_client(socket).await });

        wait_registered(&hub).await;
        // No await in between: the client task cannot drain its queue, so the
        // second broadcast finds it full and prunes it.
        assert_eq!(hub.broadcast_reload().delivered, 1);
        assert_eq!(hub.broadcast_reload().pruned, 1);

        assert_eq!(task.await.unwrap(), ClientState::Closed);
        let sent = sent.lock().unwrap();
        assert!(matches!(&sent[..], [Message::Close(None)]), "{sent:?}");
    }
}
