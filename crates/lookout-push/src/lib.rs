//! Push-channel subscription for live statistics and instance events.
//!
//! A [`StatsSubscription`] owns exactly one websocket connection for as long
//! as the view holding it is alive. Dropping it (or calling
//! [`StatsSubscription::shutdown`]) tears the connection down; nothing about
//! the connection lives in global state.

pub mod frame;

use futures::{stream::BoxStream, SinkExt, Stream, StreamExt};
use lookout_types::{
    events::{EventPayload, PushEvent, SystemStats},
    LookoutError, Result,
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, oneshot, watch},
    task::JoinHandle,
    time::{sleep, Duration},
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::frame::Frame;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Source of push events for a view.
pub trait EventFeed: Send + Sync {
    fn latest_stats(&self) -> SystemStats;
    fn subscribe(&self) -> BoxStream<'static, PushEvent>;
}

/// Build the websocket endpoint from the backend base URL.
pub fn push_url(base_url: &str, path: &str) -> Result<String> {
    let base = base_url.trim().trim_end_matches('/');
    let rest = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(push_error(format!("unsupported backend url '{base_url}'")));
    };
    let path = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    Ok(format!("{rest}{path}?EIO=4&transport=websocket"))
}

pub struct StatsSubscription {
    stats: watch::Receiver<SystemStats>,
    events: broadcast::Sender<PushEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StatsSubscription {
    /// Open the connection. The first attempt must succeed; later drops are
    /// retried in the background until the subscription is released.
    pub async fn connect(url: &str) -> Result<Self> {
        let socket = open(url).await?;
        info!("Push channel connected to {}", url);

        let (stats_tx, stats) = watch::channel(SystemStats::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(
            url.to_string(),
            socket,
            stats_tx,
            events.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            stats,
            events,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn stats(&self) -> watch::Receiver<SystemStats> {
        self.stats.clone()
    }

    /// Close the socket and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl EventFeed for StatsSubscription {
    fn latest_stats(&self) -> SystemStats {
        *self.stats.borrow()
    }

    fn subscribe(&self) -> BoxStream<'static, PushEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }
}

impl Drop for StatsSubscription {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// In-process feed backed by a broadcast channel, used when the push channel
/// is disabled.
#[derive(Clone)]
pub struct LocalFeed {
    tx: broadcast::Sender<PushEvent>,
    stats: watch::Sender<SystemStats>,
}

impl LocalFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (stats, _) = watch::channel(SystemStats::default());
        Self { tx, stats }
    }

    pub fn publish(&self, event: PushEvent) {
        if let EventPayload::Stats(stats) = &event.payload {
            self.stats.send_replace(*stats);
        }
        let _ = self.tx.send(event);
    }
}

impl EventFeed for LocalFeed {
    fn latest_stats(&self) -> SystemStats {
        *self.stats.borrow()
    }

    fn subscribe(&self) -> BoxStream<'static, PushEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }
}

async fn open(url: &str) -> Result<Socket> {
    let (socket, _) = connect_async(url)
        .await
        .map_err(|err| push_error(format!("failed to connect to {url}: {err}")))?;
    Ok(socket)
}

enum Exit {
    Released,
    Dropped,
}

async fn supervise(
    url: String,
    mut socket: Socket,
    stats: watch::Sender<SystemStats>,
    events: broadcast::Sender<PushEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        match run_connection(socket, &stats, &events, &mut shutdown).await {
            Exit::Released => {
                info!("Push channel released");
                return;
            }
            Exit::Dropped => warn!("Push channel dropped; reconnecting"),
        }

        socket = loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = sleep(RECONNECT_DELAY) => {}
            }
            match open(&url).await {
                Ok(socket) => break socket,
                Err(err) => warn!("Push channel reconnect failed: {err}"),
            }
        };
    }
}

/// Decoded text frames of a socket; binary and control messages are skipped.
fn frames(read: futures::stream::SplitStream<Socket>) -> impl Stream<Item = Result<Frame>> {
    async_stream::stream! {
        let mut read = read;
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => yield frame::decode(&text),
                Ok(Message::Close(_)) => yield Ok(Frame::Close),
                Ok(_) => continue,
                Err(err) => {
                    yield Err(push_error(err.to_string()));
                    break;
                }
            }
        }
    }
}

async fn run_connection(
    socket: Socket,
    stats: &watch::Sender<SystemStats>,
    events: &broadcast::Sender<PushEvent>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Exit {
    let (mut sink, read) = socket.split();
    let incoming = frames(read);
    tokio::pin!(incoming);

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = sink.send(Message::Text(frame::DISCONNECT.into())).await;
                let _ = sink.close().await;
                return Exit::Released;
            }
            next = incoming.next() => {
                let reply = match next {
                    None | Some(Ok(Frame::Close)) | Some(Ok(Frame::Disconnect)) => {
                        return Exit::Dropped;
                    }
                    Some(Err(err)) => {
                        warn!("Push channel error: {err}");
                        // A single undecodable frame is not fatal; transport errors end the stream.
                        continue;
                    }
                    Some(Ok(Frame::Open(params))) => {
                        debug!("Push handshake {}", params);
                        Some(frame::CONNECT)
                    }
                    Some(Ok(Frame::Ping)) => Some(frame::PONG),
                    Some(Ok(Frame::Connect)) => {
                        let _ = events.send(PushEvent::new(EventPayload::Connected));
                        None
                    }
                    Some(Ok(Frame::ConnectError(message))) => {
                        warn!("Push channel refused: {message}");
                        None
                    }
                    Some(Ok(Frame::Event { name, data })) => {
                        let payload = EventPayload::decode(&name, data);
                        if let EventPayload::Stats(sample) = &payload {
                            stats.send_replace(*sample);
                        }
                        let _ = events.send(PushEvent::new(payload));
                        None
                    }
                    Some(Ok(other)) => {
                        debug!("Ignoring push frame {:?}", other);
                        None
                    }
                };
                if let Some(text) = reply {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        warn!("Push channel write failed: {err}");
                        return Exit::Dropped;
                    }
                }
            }
        }
    }
}

pub fn push_error(message: impl Into<String>) -> LookoutError {
    LookoutError::Push(message.into())
}
