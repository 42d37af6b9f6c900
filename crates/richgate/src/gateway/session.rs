//! Session state machine.
//!
//! [`Session::handle`] consumes one [`Signal`] and returns the [`Action`]s the
//! driver must carry out. It never performs I/O, so every transition can be
//! exercised without a socket or a timer.

use std::time::Duration;

use richgate_proto::commands::{self, MemberChunk};
use richgate_proto::{Credentials, Envelope, OpCode, Presence};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::channel::ChannelEvent;
use super::events::ClientEvent;
use super::heartbeat::{HeartbeatTracker, Pulse};
use super::reconnect::ReconnectConfig;
use super::state::{Phase, SessionSnapshot};
use crate::error::GatewayError;

/// Log target for per-envelope protocol events.
pub const EVENTS_TARGET: &str = "richgate::events";

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The application asked to connect.
    Connect,
    /// Lifecycle event of channel `connection`.
    Channel {
        /// Connection the event belongs to.
        connection: u64,
        /// The event.
        event: ChannelEvent,
    },
    /// A heartbeat tick of schedule `epoch`.
    HeartbeatDue {
        /// Schedule the tick belongs to.
        epoch: u64,
    },
    /// The backoff started after losing `connection` has elapsed.
    BackoffElapsed {
        /// Connection that was lost.
        connection: u64,
    },
    /// The application asked to shut down.
    Shutdown,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open channel number `connection` to `url`.
    Open {
        /// Connection number.
        connection: u64,
        /// Gateway URL.
        url: String,
    },
    /// Send an envelope on the current channel.
    Send(Envelope),
    /// Close channel `connection`.
    CloseChannel {
        /// Connection number.
        connection: u64,
    },
    /// Start (or replace) the heartbeat timer.
    StartHeartbeat {
        /// Epoch ticks must carry.
        epoch: u64,
        /// Tick interval.
        interval: Duration,
    },
    /// Stop the heartbeat timer.
    StopHeartbeat,
    /// Wait `delay`, then deliver [`Signal::BackoffElapsed`].
    ScheduleReconnect {
        /// Connection that was lost.
        connection: u64,
        /// Backoff delay.
        delay: Duration,
    },
    /// Cancel a pending backoff timer.
    CancelReconnect,
    /// Hand a dispatch event to the router.
    Deliver {
        /// Event name.
        event: String,
        /// Event payload.
        payload: Value,
    },
    /// Publish a lifecycle event.
    Notify(ClientEvent),
}

/// The gateway session: phase, identity and heartbeat state.
#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
    gateway_url: String,
    reconnect: ReconnectConfig,
    phase: Phase,
    session_id: Option<String>,
    last_sequence: Option<u64>,
    resume_url: Option<String>,
    presence: Option<Presence>,
    heartbeat: HeartbeatTracker,
    connection: u64,
    attempts: u32,
}

impl Session {
    /// Create a session in the `Disconnected` phase.
    #[must_use]
    pub fn new(
        credentials: Credentials,
        gateway_url: impl Into<String>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            credentials,
            gateway_url: gateway_url.into(),
            reconnect,
            phase: Phase::Disconnected,
            session_id: None,
            last_sequence: None,
            resume_url: None,
            presence: None,
            heartbeat: HeartbeatTracker::new(),
            connection: 0,
            attempts: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Session id issued by the gateway.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Highest dispatch sequence seen.
    #[must_use]
    pub const fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Number of the current channel.
    #[must_use]
    pub const fn connection(&self) -> u64 {
        self.connection
    }

    /// Heartbeat state.
    #[must_use]
    pub const fn heartbeat(&self) -> &HeartbeatTracker {
        &self.heartbeat
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            session_id: self.session_id.clone(),
            last_sequence: self.last_sequence,
            heartbeat_interval: self.heartbeat.interval(),
            last_heartbeat_ack_received: self.heartbeat.last_ack_received(),
            last_heartbeat_sent_at: self.heartbeat.last_sent_at(),
        }
    }

    /// Whether a reconnect would resume rather than identify.
    #[must_use]
    pub const fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.last_sequence.is_some()
    }

    /// Check that an application envelope may be sent now.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Closed`] after shutdown and
    /// [`GatewayError::NotConnected`] in any other phase but `Connected`.
    pub fn outbound(&self, envelope: Envelope) -> Result<Action, GatewayError> {
        match self.phase {
            Phase::Connected => Ok(Action::Send(envelope)),
            Phase::Closed => Err(GatewayError::Closed),
            phase => Err(GatewayError::NotConnected { phase }),
        }
    }

    /// Remember the presence so later identifies carry it.
    pub fn remember_presence(&mut self, presence: Presence) {
        self.presence = Some(presence);
    }

    /// Apply one signal.
    pub fn handle(&mut self, signal: Signal) -> Vec<Action> {
        let mut actions = Vec::new();

        match signal {
            Signal::Connect => self.on_connect(&mut actions),
            Signal::Channel { connection, event } => {
                // Once a channel is lost its buffered events must not revive the session.
                if connection == self.connection && self.phase.is_active() {
                    self.on_channel_event(event, &mut actions);
                } else {
                    debug!(
                        connection,
                        current = self.connection,
                        phase = %self.phase,
                        "ignoring stale channel event"
                    );
                }
            }
            Signal::HeartbeatDue { epoch } => match self.heartbeat.tick(epoch) {
                Pulse::Send => {
                    debug!(target: EVENTS_TARGET, seq = ?self.last_sequence, "sending heartbeat");
                    actions.push(Action::Send(commands::heartbeat(self.last_sequence)));
                }
                Pulse::Stale => {
                    warn!("heartbeat not acknowledged, treating connection as dead");
                    self.begin_reconnect("heartbeat not acknowledged", &mut actions);
                }
                Pulse::Ignore => {}
            },
            Signal::BackoffElapsed { connection } => {
                if self.phase == Phase::Reconnecting && connection == self.connection {
                    self.open_next(&mut actions);
                }
            }
            Signal::Shutdown => self.shutdown(&mut actions),
        }

        actions
    }

    fn on_connect(&mut self, actions: &mut Vec<Action>) {
        if self.phase != Phase::Disconnected {
            debug!(phase = %self.phase, "connect ignored");
            return;
        }
        self.phase = Phase::Connecting;
        self.open_channel(self.gateway_url.clone(), actions);
    }

    fn on_channel_event(&mut self, event: ChannelEvent, actions: &mut Vec<Action>) {
        match event {
            ChannelEvent::Opened => {
                info!(connection = self.connection, "gateway channel opened");
                if self.phase == Phase::Connecting {
                    self.phase = Phase::AwaitingHello;
                }
            }
            ChannelEvent::Frame(text) => match Envelope::from_json(&text) {
                Ok(envelope) => self.on_envelope(envelope, actions),
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            },
            ChannelEvent::Closed { code, reason } => {
                info!(?code, reason = %reason, "gateway channel closed");
                let reason = match code {
                    Some(code) => format!("closed with code {code}: {reason}"),
                    None => format!("closed: {reason}"),
                };
                self.begin_reconnect(&reason, actions);
            }
            ChannelEvent::Error(cause) => {
                warn!(error = %cause, "gateway channel failed");
                self.begin_reconnect(&cause, actions);
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope, actions: &mut Vec<Action>) {
        debug!(
            target: EVENTS_TARGET,
            op = %envelope.op,
            seq = ?envelope.s,
            event = ?envelope.t,
            "received"
        );

        match envelope.op {
            OpCode::Dispatch => self.on_dispatch(envelope, actions),
            OpCode::Heartbeat => {
                self.heartbeat.mark_sent();
                actions.push(Action::Send(commands::heartbeat(self.last_sequence)));
            }
            OpCode::HeartbeatAck => {
                if let Some(latency) = self.heartbeat.acknowledge() {
                    debug!(target: EVENTS_TARGET, latency_ms = latency.as_millis() as u64, "heartbeat acknowledged");
                }
            }
            OpCode::Hello => self.on_hello(&envelope.d, actions),
            OpCode::ResumeAck => self.begin_reconnect("gateway sent resume acknowledgment", actions),
            OpCode::Reconnect => self.begin_reconnect("gateway requested reconnect", actions),
            OpCode::InvalidSession => {
                warn!(session_id = ?self.session_id, "session invalidated, identifying again");
                self.identify(actions);
            }
            OpCode::RequestMembers => {
                let chunk = MemberChunk::single_page(&envelope.d, Vec::new());
                actions.push(Action::Send(commands::member_chunk(&chunk)));
            }
            op @ (OpCode::Identify | OpCode::PresenceUpdate | OpCode::Resume) => {
                warn!(op = %op, "gateway sent an outbound-only opcode, ignoring");
            }
        }
    }

    fn on_dispatch(&mut self, envelope: Envelope, actions: &mut Vec<Action>) {
        if let Some(seq) = envelope.s {
            self.last_sequence = Some(self.last_sequence.map_or(seq, |last| last.max(seq)));
        }

        let Some(event) = envelope.t else {
            return;
        };

        match event.as_str() {
            "READY" => {
                self.session_id = envelope
                    .d
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                self.resume_url = envelope
                    .d
                    .get("resume_gateway_url")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                self.established(false, actions);
            }
            "RESUMED" if self.phase == Phase::Resuming => self.established(true, actions),
            _ => {}
        }

        actions.push(Action::Deliver {
            event,
            payload: envelope.d,
        });
    }

    fn on_hello(&mut self, d: &Value, actions: &mut Vec<Action>) {
        let Some(interval_ms) = d.get("heartbeat_interval").and_then(Value::as_u64) else {
            warn!("hello without heartbeat_interval, ignoring");
            return;
        };

        let interval = Duration::from_millis(interval_ms);
        let epoch = self.heartbeat.start(interval);
        actions.push(Action::StartHeartbeat { epoch, interval });
        info!(interval_ms, "received hello, heartbeat started");

        match self.phase {
            Phase::AwaitingHello => self.identify(actions),
            Phase::Resuming => match (self.session_id.as_deref(), self.last_sequence) {
                (Some(session_id), Some(seq)) => {
                    info!(session_id, seq, "resuming session");
                    actions.push(Action::Send(commands::resume(
                        &self.credentials,
                        session_id,
                        seq,
                    )));
                }
                _ => self.identify(actions),
            },
            // A repeated hello only refreshes the heartbeat schedule.
            _ => {}
        }
    }

    fn identify(&mut self, actions: &mut Vec<Action>) {
        self.session_id = None;
        self.last_sequence = None;
        self.resume_url = None;
        self.phase = Phase::Identifying;
        actions.push(Action::Send(commands::identify(
            &self.credentials,
            self.presence.as_ref(),
        )));
    }

    fn established(&mut self, resumed: bool, actions: &mut Vec<Action>) {
        self.phase = Phase::Connected;
        self.attempts = 0;
        info!(session_id = ?self.session_id, resumed, "gateway session established");
        actions.push(Action::Notify(ClientEvent::Connected {
            session_id: self.session_id.clone(),
            resumed,
        }));
    }

    fn begin_reconnect(&mut self, reason: &str, actions: &mut Vec<Action>) {
        if !self.phase.is_active() {
            return;
        }

        self.heartbeat.stop();
        actions.push(Action::StopHeartbeat);
        actions.push(Action::CloseChannel {
            connection: self.connection,
        });
        actions.push(Action::Notify(ClientEvent::Disconnected {
            reason: reason.to_string(),
        }));

        self.attempts += 1;
        if !self.reconnect.allows_attempt(self.attempts) {
            let attempts = self.attempts - 1;
            warn!(attempts, "giving up on reconnecting");
            self.phase = Phase::Closed;
            actions.push(Action::Notify(ClientEvent::ReconnectFailed { attempts }));
            actions.push(Action::Notify(ClientEvent::Closed));
            return;
        }

        let delay = self.reconnect.delay_for_attempt(self.attempts);
        info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            reason,
            "reconnecting"
        );
        self.phase = Phase::Reconnecting;
        actions.push(Action::ScheduleReconnect {
            connection: self.connection,
            delay,
        });
        actions.push(Action::Notify(ClientEvent::Reconnecting {
            attempt: self.attempts,
            delay,
        }));
    }

    fn open_next(&mut self, actions: &mut Vec<Action>) {
        if self.can_resume() {
            self.phase = Phase::Resuming;
            let url = self
                .resume_url
                .clone()
                .unwrap_or_else(|| self.gateway_url.clone());
            self.open_channel(url, actions);
        } else {
            self.phase = Phase::Connecting;
            self.open_channel(self.gateway_url.clone(), actions);
        }
    }

    fn open_channel(&mut self, url: String, actions: &mut Vec<Action>) {
        self.connection += 1;
        actions.push(Action::Open {
            connection: self.connection,
            url,
        });
    }

    fn shutdown(&mut self, actions: &mut Vec<Action>) {
        if self.phase == Phase::Closed {
            return;
        }
        info!(phase = %self.phase, "shutting down gateway session");
        self.phase = Phase::Closed;
        self.heartbeat.stop();
        actions.push(Action::StopHeartbeat);
        actions.push(Action::CancelReconnect);
        actions.push(Action::CloseChannel {
            connection: self.connection,
        });
        actions.push(Action::Notify(ClientEvent::Closed));
    }
}
