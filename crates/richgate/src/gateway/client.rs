//! Gateway client: a handle to the task that owns the session.

use std::sync::Arc;

use parking_lot::Mutex;
use richgate_proto::commands;
use richgate_proto::{Envelope, Presence, RequestMembers};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::channel::{ChannelCommand, ChannelHandle, Connector};
use super::dispatch::{DispatchRouter, HandlerError};
use super::events::ClientEvent;
use super::heartbeat::{start_heartbeat_task, HeartbeatHandle};
use super::reconnect::{start_backoff_timer, BackoffHandle};
use super::session::{Action, Session, Signal};
use super::state::{Phase, SessionSnapshot};
use crate::config::GatewayConfig;
use crate::error::GatewayError;

const COMMAND_CAPACITY: usize = 32;
const SIGNAL_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;

enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    Send {
        envelope: Envelope,
        presence: Option<Presence>,
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    Close,
}

/// Client for a single gateway session.
///
/// All session state lives in a background task; this handle only sends it
/// commands. Must be created inside a Tokio runtime.
pub struct GatewayClient {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<ClientEvent>,
    router: Arc<DispatchRouter>,
    application_id: Option<String>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("phase", &self.phase())
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a client and start its session task.
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the configuration is invalid or has no token.
    pub fn new(config: &GatewayConfig, connector: impl Connector) -> Result<Self, GatewayError> {
        config.validate()?;
        let credentials = config.credentials()?;
        let session = Session::new(
            credentials,
            config.gateway_url.clone(),
            config.reconnect_config(),
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let router = Arc::new(DispatchRouter::new());

        let driver = Driver {
            session,
            connector: Box::new(connector),
            signal_tx,
            snapshot_tx,
            event_tx: event_tx.clone(),
            router: Arc::clone(&router),
            channel: None,
            heartbeat: None,
            backoff: None,
        };
        let task = tokio::spawn(driver.run(command_rx, signal_rx));

        Ok(Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            events: event_tx,
            router,
            application_id: config.client_id.clone(),
            task: Mutex::new(Some(task)),
        })
    }

    /// Start connecting. Resolves once the session task accepted the request;
    /// use [`ready`](Self::ready) to wait for the session itself.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply })
            .await
            .map_err(|_| GatewayError::Closed)?;
        rx.await.map_err(|_| GatewayError::Closed)?
    }

    /// Wait until the session is `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Closed`] if the client shuts down first.
    pub async fn ready(&self) -> Result<(), GatewayError> {
        let mut rx = self.snapshot.clone();
        loop {
            let phase = rx.borrow_and_update().phase;
            match phase {
                Phase::Connected => return Ok(()),
                Phase::Closed => return Err(GatewayError::Closed),
                _ => {}
            }
            rx.changed().await.map_err(|_| GatewayError::Closed)?;
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.snapshot.borrow().phase
    }

    /// Snapshot of the session state.
    #[must_use]
    pub fn session(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Publish a presence.
    ///
    /// The presence is shaped, stamped with the configured client id and
    /// remembered, so later identifies carry it even if this call fails
    /// with [`GatewayError::NotConnected`].
    pub async fn set_presence(&self, presence: Presence) -> Result<(), GatewayError> {
        let mut presence = presence.shaped();
        if let Some(application_id) = &self.application_id {
            presence = presence.with_application_id(application_id);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            match serde_json::to_string_pretty(&presence) {
                Ok(json) => debug!("setting presence:\n{json}"),
                Err(e) => debug!(error = %e, "setting presence"),
            }
        }

        let envelope = commands::presence_update(&presence);
        self.send(envelope, Some(presence)).await
    }

    /// Ask the gateway for a guild's member list.
    pub async fn request_members(&self, request: &RequestMembers) -> Result<(), GatewayError> {
        self.send(commands::request_members(request), None).await
    }

    /// Register a handler for dispatch event `event` (for example `"READY"`).
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.router.register(event, handler);
    }

    /// Receive lifecycle events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Shut down and wait for the session task to exit. Idempotent.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "gateway session task failed");
            }
        }
    }

    async fn send(
        &self,
        envelope: Envelope,
        presence: Option<Presence>,
    ) -> Result<(), GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                envelope,
                presence,
                reply,
            })
            .await
            .map_err(|_| GatewayError::Closed)?;
        rx.await.map_err(|_| GatewayError::Closed)?
    }
}

/// Owns the session and carries out its actions.
struct Driver {
    session: Session,
    connector: Box<dyn Connector>,
    signal_tx: mpsc::Sender<Signal>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    event_tx: broadcast::Sender<ClientEvent>,
    router: Arc<DispatchRouter>,
    channel: Option<(u64, mpsc::Sender<ChannelCommand>)>,
    heartbeat: Option<HeartbeatHandle>,
    backoff: Option<BackoffHandle>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut signals: mpsc::Receiver<Signal>,
    ) {
        debug!("gateway session task started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect { reply }) => {
                        let result = if self.session.phase() == Phase::Closed {
                            Err(GatewayError::Closed)
                        } else {
                            Ok(())
                        };
                        self.apply(Signal::Connect);
                        let _ = reply.send(result);
                    }
                    Some(Command::Send { envelope, presence, reply }) => {
                        if let Some(presence) = presence {
                            self.session.remember_presence(presence);
                        }
                        let result = match self.session.outbound(envelope) {
                            Ok(Action::Send(envelope)) => self.transmit(&envelope),
                            Ok(_) => Ok(()),
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    Some(Command::Close) | None => self.apply(Signal::Shutdown),
                },
                Some(signal) = signals.recv() => self.apply(signal),
            }

            if self.session.phase() == Phase::Closed {
                break;
            }
        }

        debug!("gateway session task stopped");
    }

    fn apply(&mut self, signal: Signal) {
        for action in self.session.handle(signal) {
            self.execute(action);
        }
        self.snapshot_tx.send_replace(self.session.snapshot());
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Open { connection, url } => {
                info!(connection, url = %url, "opening gateway channel");
                let ChannelHandle {
                    outbound,
                    mut events,
                } = self.connector.open(&url);
                let tx = self.signal_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if tx.send(Signal::Channel { connection, event }).await.is_err() {
                            break;
                        }
                    }
                });
                self.channel = Some((connection, outbound));
            }
            Action::Send(envelope) => {
                if let Err(e) = self.transmit(&envelope) {
                    warn!(op = %envelope.op, error = %e, "failed to send envelope");
                }
            }
            Action::CloseChannel { connection } => {
                if let Some((current, outbound)) = self.channel.take() {
                    if current == connection {
                        let _ = outbound.try_send(ChannelCommand::Close);
                    } else {
                        self.channel = Some((current, outbound));
                    }
                }
            }
            Action::StartHeartbeat { epoch, interval } => {
                self.heartbeat = Some(start_heartbeat_task(
                    epoch,
                    interval,
                    self.signal_tx.clone(),
                ));
            }
            Action::StopHeartbeat => {
                if let Some(heartbeat) = self.heartbeat.take() {
                    heartbeat.stop();
                }
            }
            Action::ScheduleReconnect { connection, delay } => {
                self.backoff = Some(start_backoff_timer(
                    connection,
                    delay,
                    self.signal_tx.clone(),
                ));
            }
            Action::CancelReconnect => {
                if let Some(backoff) = self.backoff.take() {
                    backoff.cancel();
                }
            }
            Action::Deliver { event, payload } => {
                let delivery = self.router.deliver(&event, &payload);
                for failure in delivery.failures {
                    warn!(error = %failure, "dispatch handler failed");
                }
            }
            Action::Notify(event) => {
                let _ = self.event_tx.send(event);
            }
        }
    }

    /// Queue a frame without waiting; a transport that stopped draining must
    /// not stall the session task.
    fn transmit(&self, envelope: &Envelope) -> Result<(), GatewayError> {
        let Some((_, outbound)) = &self.channel else {
            return Err(GatewayError::ChannelSend("no open channel".to_string()));
        };
        let json = envelope.to_json()?;
        outbound
            .try_send(ChannelCommand::Frame(json))
            .map_err(|e| match e {
                TrySendError::Full(_) => GatewayError::ChannelSend("channel full".to_string()),
                TrySendError::Closed(_) => {
                    GatewayError::ChannelSend("channel closed".to_string())
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectSettings;
    use crate::gateway::channel::{ChannelEvent, ChannelPeer, CHANNEL_CAPACITY};
    use richgate_proto::{Activity, ActivityKind, Assets, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    /// Hands every opened channel's far end to the test.
    struct MockConnector {
        peers: mpsc::UnboundedSender<(String, ChannelPeer)>,
    }

    impl Connector for MockConnector {
        fn open(&self, url: &str) -> ChannelHandle {
            let (handle, peer) = ChannelHandle::pair();
            let _ = self.peers.send((url.to_string(), peer));
            handle
        }
    }

    fn test_config() -> GatewayConfig {
        let mut config = GatewayConfig::new("test-token");
        config.gateway_url = "wss://gateway.test/?v=9".to_string();
        config.client_id = Some("12345".to_string());
        config.reconnect = ReconnectSettings {
            initial_delay_ms: 10,
            max_delay_ms: 10,
            ..ReconnectSettings::default()
        };
        config
    }

    fn client() -> (GatewayClient, mpsc::UnboundedReceiver<(String, ChannelPeer)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = GatewayClient::new(&test_config(), MockConnector { peers: tx })
            .expect("client creation");
        (client, rx)
    }

    async fn next_peer(rx: &mut mpsc::UnboundedReceiver<(String, ChannelPeer)>) -> (String, ChannelPeer) {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timeout waiting for channel open")
            .expect("connector dropped")
    }

    async fn push(peer: &ChannelPeer, event: ChannelEvent) {
        peer.events.send(event).await.expect("event send");
    }

    async fn push_frame(peer: &ChannelPeer, json: &str) {
        push(peer, ChannelEvent::Frame(json.to_string())).await;
    }

    async fn next_frame(peer: &mut ChannelPeer) -> Value {
        loop {
            let command = tokio::time::timeout(WAIT, peer.outbound.recv())
                .await
                .expect("timeout waiting for frame")
                .expect("channel closed");
            if let ChannelCommand::Frame(text) = command {
                return serde_json::from_str(&text).expect("valid json");
            }
        }
    }

    /// Open, hello and READY on a fresh client.
    async fn established(
        client: &GatewayClient,
        peers: &mut mpsc::UnboundedReceiver<(String, ChannelPeer)>,
    ) -> ChannelPeer {
        client.connect().await.expect("connect");
        let (_, mut peer) = next_peer(peers).await;
        push(&peer, ChannelEvent::Opened).await;
        push_frame(&peer, r#"{"op":10,"d":{"heartbeat_interval":60000}}"#).await;
        let identify = next_frame(&mut peer).await;
        assert_eq!(identify["op"], 2);
        push_frame(
            &peer,
            r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"sess"}}"#,
        )
        .await;
        tokio::time::timeout(WAIT, client.ready())
            .await
            .expect("timeout waiting for ready")
            .expect("ready");
        peer
    }

    #[tokio::test]
    async fn test_new_rejects_missing_token() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = GatewayClient::new(&GatewayConfig::default(), MockConnector { peers: tx });
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_identify_flow_reaches_connected() {
        let (client, mut peers) = client();
        assert_eq!(client.phase(), Phase::Disconnected);

        client.connect().await.expect("connect");
        let (url, mut peer) = next_peer(&mut peers).await;
        assert_eq!(url, "wss://gateway.test/?v=9");

        push(&peer, ChannelEvent::Opened).await;
        push_frame(&peer, r#"{"op":10,"d":{"heartbeat_interval":45000}}"#).await;

        let identify = next_frame(&mut peer).await;
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "test-token");
        assert_eq!(identify["d"]["intents"], 513);

        push_frame(&peer, r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc"}}"#).await;
        tokio::time::timeout(WAIT, client.ready())
            .await
            .expect("timeout")
            .expect("ready");

        let snapshot = client.session();
        assert_eq!(snapshot.session_id.as_deref(), Some("abc"));
        assert_eq!(snapshot.last_sequence, Some(1));
        assert_eq!(snapshot.heartbeat_interval, Some(Duration::from_secs(45)));

        client.close().await;
    }

    #[tokio::test]
    async fn test_set_presence_before_connect_fails() {
        let (client, _peers) = client();
        let result = client.set_presence(Presence::default()).await;
        assert!(matches!(
            result,
            Err(GatewayError::NotConnected {
                phase: Phase::Disconnected
            })
        ));
        client.close().await;
    }

    #[tokio::test]
    async fn test_set_presence_sends_shaped_update() {
        let (client, mut peers) = client();
        let mut peer = established(&client, &mut peers).await;

        let activity = Activity::new("Testing", ActivityKind::Playing).with_assets(Assets {
            large_image: Some("https://cdn.discordapp.com/app-assets/1/2.png".into()),
            ..Assets::default()
        });
        client
            .set_presence(Presence::new(Status::Dnd).with_activity(activity))
            .await
            .expect("presence sent");

        let update = next_frame(&mut peer).await;
        assert_eq!(update["op"], 3);
        assert_eq!(update["d"]["status"], "dnd");
        let activity = &update["d"]["activities"][0];
        assert_eq!(activity["application_id"], "12345");
        assert_eq!(activity["assets"]["large_image"], "mp:app-assets/1/2.png");

        client.close().await;
    }

    #[tokio::test]
    async fn test_handlers_receive_dispatches() {
        let (client, mut peers) = client();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        client.on("MESSAGE_CREATE", move |payload| {
            assert_eq!(payload["content"], "hello");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let peer = established(&client, &mut peers).await;
        push_frame(
            &peer,
            r#"{"op":0,"s":2,"t":"MESSAGE_CREATE","d":{"content":"hello"}}"#,
        )
        .await;

        tokio::time::timeout(WAIT, async {
            while count.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler not called");

        client.close().await;
    }

    #[tokio::test]
    async fn test_reconnect_resumes_session() {
        let (client, mut peers) = client();
        let mut events = client.subscribe();
        let peer = established(&client, &mut peers).await;

        push(
            &peer,
            ChannelEvent::Closed {
                code: Some(1001),
                reason: "going away".into(),
            },
        )
        .await;

        let (_, mut second) = next_peer(&mut peers).await;
        push(&second, ChannelEvent::Opened).await;
        push_frame(&second, r#"{"op":10,"d":{"heartbeat_interval":60000}}"#).await;

        let resume = next_frame(&mut second).await;
        assert_eq!(resume["op"], 5);
        assert_eq!(resume["d"]["session_id"], "sess");
        assert_eq!(resume["d"]["seq"], 1);

        push_frame(&second, r#"{"op":0,"s":2,"t":"RESUMED","d":{}}"#).await;
        client.ready().await.expect("ready");

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ClientEvent::Connected {
            session_id: Some("sess".into()),
            resumed: true
        }));
        assert!(seen
            .iter()
            .any(|e| matches!(e, ClientEvent::Reconnecting { attempt: 1, .. })));

        client.close().await;
    }

    #[tokio::test]
    async fn test_close_during_backoff_aborts_reconnect() {
        let mut config = test_config();
        config.reconnect.initial_delay_ms = 200;
        config.reconnect.max_delay_ms = 200;
        let (tx, mut peers) = mpsc::unbounded_channel();
        let client = GatewayClient::new(&config, MockConnector { peers: tx }).expect("client");

        client.connect().await.expect("connect");
        let (_, peer) = next_peer(&mut peers).await;
        push(&peer, ChannelEvent::Error("refused".into())).await;

        tokio::time::timeout(WAIT, async {
            while client.phase() != Phase::Reconnecting {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("never started reconnecting");

        client.close().await;
        assert_eq!(client.phase(), Phase::Closed);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(peers.try_recv().is_err(), "no channel opened after close");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, mut peers) = client();
        let mut events = client.subscribe();
        let mut peer = established(&client, &mut peers).await;

        client.close().await;
        client.close().await;

        assert_eq!(client.phase(), Phase::Closed);
        assert!(matches!(client.connect().await, Err(GatewayError::Closed)));
        assert!(matches!(
            client.set_presence(Presence::default()).await,
            Err(GatewayError::Closed)
        ));
        assert!(matches!(client.ready().await, Err(GatewayError::Closed)));

        // The channel was told to close and nothing else followed.
        let mut commands = Vec::new();
        while let Ok(command) = peer.outbound.try_recv() {
            commands.push(command);
        }
        assert_eq!(commands, vec![ChannelCommand::Close]);

        let mut closed = 0;
        while let Ok(event) = events.try_recv() {
            if event == ClientEvent::Closed {
                closed += 1;
            }
        }
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn test_stalled_transport_does_not_block_close() {
        let (client, mut peers) = client();
        // Keep the peer alive but never read its outbound queue again.
        let _peer = established(&client, &mut peers).await;

        let mut full = 0;
        for _ in 0..(CHANNEL_CAPACITY + 8) {
            let result = tokio::time::timeout(
                Duration::from_millis(200),
                client.set_presence(Presence::default()),
            )
            .await
            .expect("set_presence blocked on a full channel");
            if let Err(e) = result {
                assert!(matches!(e, GatewayError::ChannelSend(_)), "unexpected error: {e}");
                full += 1;
            }
        }
        assert!(full > 0, "queue never filled up");

        tokio::time::timeout(WAIT, client.close())
            .await
            .expect("close hung behind a full channel");
        assert_eq!(client.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn test_request_members_requires_session() {
        let (client, mut peers) = client();
        assert!(client
            .request_members(&RequestMembers::all("1"))
            .await
            .is_err());

        let mut peer = established(&client, &mut peers).await;
        client
            .request_members(&RequestMembers::all("1").with_nonce("n"))
            .await
            .expect("request sent");
        let request = next_frame(&mut peer).await;
        assert_eq!(request["op"], 8);
        assert_eq!(request["d"]["guild_id"], "1");
        assert_eq!(request["d"]["nonce"], "n");

        client.close().await;
    }
}
