//! WebSocket connection to the OpenAI Realtime API.

use super::{RealtimeSession, SessionAction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use handoff_core::protocol::ClientEvent;
use handoff_core::transport::{
    ConnectOptions, ConnectionStatus, RealtimeTransport, TransportMessage, TransportNotification,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Slot = Arc<Mutex<Option<ActiveConnection>>>;

struct ActiveConnection {
    epoch: u64,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    response_active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// [`RealtimeTransport`] over `tokio-tungstenite`.
///
/// Notifications go out on the channel handed to [`OpenAIRealtimeTransport::new`],
/// tagged with the epoch of the connection that raised them; the host drains
/// it into the lifecycle manager. At most one connection is open at a time.
pub struct OpenAIRealtimeTransport {
    url: String,
    model: String,
    connect_timeout: Duration,
    notifier: mpsc::UnboundedSender<TransportMessage>,
    active: Slot,
    muted: AtomicBool,
}

impl OpenAIRealtimeTransport {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        connect_timeout: Duration,
        notifier: mpsc::UnboundedSender<TransportMessage>,
    ) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            connect_timeout,
            notifier,
            active: Arc::new(Mutex::new(None)),
            muted: AtomicBool::new(false),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock().is_some()
    }

    fn notify(&self, epoch: u64, notification: TransportNotification) {
        if self
            .notifier
            .send(TransportMessage::new(epoch, notification))
            .is_err()
        {
            debug!("Notification receiver dropped");
        }
    }

    fn close(&self, connection: ActiveConnection) {
        connection.task.abort();
        info!(epoch = connection.epoch, "Realtime connection closed");
        self.notify(
            connection.epoch,
            TransportNotification::ConnectionChange(ConnectionStatus::Disconnected),
        );
    }
}

/// Everything the socket task needs besides the socket itself.
struct ConnectionContext {
    epoch: u64,
    session: RealtimeSession,
    notifier: mpsc::UnboundedSender<TransportMessage>,
    response_active: Arc<AtomicBool>,
    slot: Slot,
}

async fn send_event(
    sink: &mut SplitSink<WsStream, WsMessage>,
    event: &ClientEvent,
) -> Result<()> {
    let text = serde_json::to_string(event)?;
    sink.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

/// Pumps outbound events and server messages until either side closes, then
/// frees the connection slot if it still holds this connection.
async fn run_connection(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut stream: SplitStream<WsStream>,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    context: ConnectionContext,
) {
    let ConnectionContext {
        epoch,
        mut session,
        notifier,
        response_active,
        slot,
    } = context;
    let result = async {
        loop {
            tokio::select! {
                Some(event) = outbound.recv() => {
                    send_event(&mut sink, &event).await?;
                },
                msg = stream.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let value: Value = match serde_json::from_str(&text) {
                            Ok(value) => value,
                            Err(e) => {
                                warn!(error = %e, "Unparseable server message");
                                continue;
                            }
                        };
                        match value.get("type").and_then(Value::as_str) {
                            Some("response.created") => response_active.store(true, Ordering::SeqCst),
                            Some("response.done") => response_active.store(false, Ordering::SeqCst),
                            _ => {}
                        }
                        for action in session.on_server_event(value) {
                            match action {
                                SessionAction::Send(event) => send_event(&mut sink, &event).await?,
                                SessionAction::Notify(notification) => {
                                    let _ = notifier.send(TransportMessage::new(epoch, notification));
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "Realtime server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("Realtime socket error"),
                    None => break,
                },
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(e) = result {
        error!(error = ?e, "Realtime connection terminated with error");
    }
    {
        let mut slot = slot.lock();
        if slot.as_ref().is_some_and(|c| c.epoch == epoch) {
            slot.take();
        }
    }
    let _ = notifier.send(TransportMessage::new(
        epoch,
        TransportNotification::ConnectionChange(ConnectionStatus::Disconnected),
    ));
}

#[async_trait]
impl RealtimeTransport for OpenAIRealtimeTransport {
    async fn connect(&self, options: ConnectOptions) -> Result<()> {
        let epoch = options.epoch;
        let session = RealtimeSession::new(
            options.initial_roster,
            options.output_guardrail,
            options.session_defaults,
        )?;

        let url = format!("{}?model={}", self.url, self.model);
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", options.credential.expose()).parse()?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .context("Timed out connecting to OpenAI Realtime WebSocket")?
            .context("Failed to connect to OpenAI Realtime WebSocket")?;
        let (mut sink, stream) = ws_stream.split();
        send_event(&mut sink, &session.initial_update()).await?;
        info!(epoch, persona = %session.active_persona_name(), "Connected to OpenAI Realtime API.");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let response_active = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_connection(
            sink,
            stream,
            outbound_rx,
            ConnectionContext {
                epoch,
                session,
                notifier: self.notifier.clone(),
                response_active: response_active.clone(),
                slot: self.active.clone(),
            },
        ));

        let previous = {
            let mut active = self.active.lock();
            let newer = active.as_ref().map(|c| c.epoch).filter(|&open| open > epoch);
            if let Some(newer) = newer {
                drop(active);
                task.abort();
                anyhow::bail!("Connection {epoch} was superseded by connection {newer}");
            }
            active.replace(ActiveConnection {
                epoch,
                outbound,
                response_active,
                task,
            })
        };
        if let Some(previous) = previous {
            if !previous.task.is_finished() {
                warn!(
                    epoch = previous.epoch,
                    "Replacing a realtime connection that was never disconnected"
                );
            }
            previous.task.abort();
        }

        self.notify(
            epoch,
            TransportNotification::ConnectionChange(ConnectionStatus::Connected),
        );
        Ok(())
    }

    fn disconnect(&self) {
        let Some(connection) = self.active.lock().take() else {
            return;
        };
        self.close(connection);
    }

    fn release(&self, epoch: u64) {
        let connection = {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|c| c.epoch == epoch) {
                active.take()
            } else {
                None
            }
        };
        match connection {
            Some(connection) => self.close(connection),
            None => debug!(epoch, "Release of a connection that is no longer open"),
        }
    }

    fn send_event(&self, event: ClientEvent) {
        match self.active.lock().as_ref() {
            Some(connection) => {
                if connection.outbound.send(event).is_err() {
                    debug!("Realtime connection task has ended, event dropped");
                }
            }
            None => debug!(event = event.name(), "No realtime connection, event dropped"),
        }
    }

    fn interrupt(&self) {
        if let Some(connection) = self.active.lock().as_ref() {
            if connection.response_active.swap(false, Ordering::SeqCst) {
                let _ = connection.outbound.send(ClientEvent::ResponseCancel);
            }
        }
    }

    fn mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        debug!(muted, "Playback mute changed");
    }
}
