//! Connection state machine.
//!
//! Pure state machine in the action style: methods take the current time as
//! a parameter and return `Result<Vec<ConnectionAction>, ConnectionError>`;
//! a driver executes the actions (dial, write bytes, deliver nodes, tear
//! down). No I/O happens here, which keeps handshake ordering, login, and
//! keepalive behavior testable without a runtime.
//!
//! # States
//!
//! ```text
//! Idle ──start──> Connecting ──transport_connected──> Handshaking
//!                                                          │ key exchange done
//!                                                          v
//!     Open <──<success> received── Authenticating <────────┘
//!      │                                │ <failure> received
//!      │ close / timeout / error        v
//!      └───────────> Closing ──transport_closed──> Closed
//! ```
//!
//! One instance drives exactly one transport connection. Reconnecting means
//! building a fresh `Connection`: session keys, handshake state, and request
//! ids never survive across attempts.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};
use treeline_crypto::handshake::{HandshakeEngine, HandshakeOutcome, Role};
use treeline_crypto::{FrameCipher, StaticKeypair};
use treeline_proto::frame::encode_frame;
use treeline_proto::{Jid, Node, decode, encode};

use crate::error::{CloseReason, ConnectionError};
use crate::events::LifecycleEvent;

/// Actions returned by the state machine for the driver to execute.
#[derive(Debug)]
pub enum ConnectionAction {
    /// Dial the transport.
    Connect,
    /// Write these bytes to the transport. Already framed and, after the
    /// handshake, encrypted.
    SendBytes(Bytes),
    /// Deliver an inbound node to the application layer.
    Publish(Node),
    /// Report a lifecycle transition to the application layer.
    Notify(LifecycleEvent),
    /// Shut the transport down, then call
    /// [`Connection::transport_closed`].
    Close(CloseReason),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, nothing started.
    Idle,
    /// Waiting for the transport to come up.
    Connecting,
    /// Key exchange in flight.
    Handshaking,
    /// Channel encrypted, login request sent.
    Authenticating,
    /// Logged in; requests and pushes flow.
    Open,
    /// Teardown requested, waiting for the transport to go away.
    Closing,
    /// Terminal.
    Closed,
}

/// Timing knobs for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for the combined handshake and login exchange.
    pub handshake_timeout: Duration,
    /// Quiet time on an open connection before a keepalive ping goes out.
    pub keepalive_interval: Duration,
    /// How long to wait for the keepalive response.
    pub keepalive_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(25),
            keepalive_timeout: Duration::from_secs(10),
        }
    }
}

/// Login material presented after the handshake.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Server-issued credential token.
    pub token: String,
    /// Previously assigned address, if this device has logged in before.
    pub jid: Option<Jid>,
}

/// State machine for one connection incarnation.
pub struct Connection {
    state: ConnectionState,
    config: ConnectionConfig,
    identity: StaticKeypair,
    auth: AuthConfig,
    handshake: Option<HandshakeEngine>,
    cipher: Option<FrameCipher>,
    assigned_jid: Option<Jid>,
    server_identity: Option<[u8; 32]>,
    /// When the current state was entered; drives the handshake deadline.
    state_entered: Instant,
    /// Last inbound or outbound activity on the open connection.
    last_activity: Instant,
    /// Outstanding keepalive ping: id attribute and send time.
    ping_outstanding: Option<(String, Instant)>,
    ping_seq: u64,
    /// Reason recorded when teardown begins, reported once the transport is
    /// actually gone.
    close_reason: Option<CloseReason>,
}

impl Connection {
    /// A fresh connection in `Idle`.
    #[must_use]
    pub fn new(
        now: Instant,
        config: ConnectionConfig,
        identity: StaticKeypair,
        auth: AuthConfig,
    ) -> Self {
        Self {
            state: ConnectionState::Idle,
            config,
            identity,
            auth,
            handshake: None,
            cipher: None,
            assigned_jid: None,
            server_identity: None,
            state_entered: now,
            last_activity: now,
            ping_outstanding: None,
            ping_seq: 0,
            close_reason: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Address the server assigned during login.
    #[must_use]
    pub fn assigned_jid(&self) -> Option<&Jid> {
        self.assigned_jid.as_ref()
    }

    /// The server's static public key, once authenticated by the handshake.
    #[must_use]
    pub fn server_identity(&self) -> Option<[u8; 32]> {
        self.server_identity
    }

    /// Kick off a connection attempt.
    pub fn start(&mut self, now: Instant) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Idle {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "start" });
        }
        self.enter(ConnectionState::Connecting, now);
        Ok(vec![
            ConnectionAction::Notify(LifecycleEvent::Connecting),
            ConnectionAction::Connect,
        ])
    }

    /// The driver's dial succeeded; begin the key exchange.
    pub fn transport_connected(
        &mut self,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "transport_connected",
            });
        }
        let mut engine = HandshakeEngine::new(Role::Initiator, self.identity.clone());
        let hello = engine.start()?.ok_or(treeline_crypto::HandshakeError::InvalidState(
            "initiator produced no hello",
        ))?;
        self.handshake = Some(engine);
        self.enter(ConnectionState::Handshaking, now);
        debug!(bytes = hello.len(), "handshake started");
        Ok(vec![ConnectionAction::SendBytes(frame_bytes(&hello)?)])
    }

    /// Process one deframed inbound payload.
    ///
    /// Before the handshake completes the payload is a plaintext handshake
    /// message; afterwards it is an encrypted frame body.
    pub fn handle_frame(
        &mut self,
        payload: &[u8],
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        match self.state {
            ConnectionState::Handshaking => self.handle_handshake_frame(payload, now),
            ConnectionState::Authenticating => self.handle_auth_frame(payload, now),
            ConnectionState::Open => self.handle_open_frame(payload, now),
            state => {
                Err(ConnectionError::InvalidState { state, operation: "handle_frame" })
            }
        }
    }

    /// Send an application node. Only valid on an open connection.
    pub fn send_node(
        &mut self,
        node: &Node,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "send_node",
            });
        }
        let bytes = self.seal_node(node)?;
        self.last_activity = now;
        Ok(vec![ConnectionAction::SendBytes(bytes)])
    }

    /// Advance deadlines: handshake timeout, keepalive send, keepalive loss.
    ///
    /// Call on a coarse interval; a second is plenty.
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Handshaking
            | ConnectionState::Authenticating => {
                if now.duration_since(self.state_entered) > self.config.handshake_timeout {
                    warn!(state = ?self.state, "handshake deadline expired");
                    return self.fail(CloseReason::Timeout);
                }
                vec![]
            }
            ConnectionState::Open => self.tick_keepalive(now),
            _ => vec![],
        }
    }

    /// Begin a graceful, application-requested close.
    pub fn close(&mut self, now: Instant) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Closing | ConnectionState::Closed => vec![],
            ConnectionState::Idle => {
                self.close_reason = Some(CloseReason::LocalRequest);
                self.enter(ConnectionState::Closed, now);
                vec![ConnectionAction::Notify(LifecycleEvent::Closed(CloseReason::LocalRequest))]
            }
            _ => self.fail(CloseReason::LocalRequest),
        }
    }

    /// Record a non-recoverable processing failure and begin teardown.
    ///
    /// The driver calls this with [`ConnectionError::close_reason`] when an
    /// input method returns an error.
    pub fn fail(&mut self, reason: CloseReason) -> Vec<ConnectionAction> {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return vec![];
        }
        self.state = ConnectionState::Closing;
        self.close_reason = Some(reason.clone());
        self.cipher = None;
        self.handshake = None;
        vec![ConnectionAction::Close(reason)]
    }

    /// The transport is gone, cleanly or otherwise. Terminal.
    ///
    /// `reason_hint` describes what the driver observed; a reason already
    /// recorded by the state machine (a timeout, a rejection) wins over it.
    pub fn transport_closed(&mut self, reason_hint: CloseReason) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return vec![];
        }
        let reason = self.close_reason.take().unwrap_or(reason_hint);
        self.state = ConnectionState::Closed;
        self.cipher = None;
        self.handshake = None;
        debug!(?reason, "connection closed");
        vec![ConnectionAction::Notify(LifecycleEvent::Closed(reason))]
    }

    fn enter(&mut self, state: ConnectionState, now: Instant) {
        debug!(from = ?self.state, to = ?state, "state transition");
        self.state = state;
        self.state_entered = now;
    }

    fn handle_handshake_frame(
        &mut self,
        payload: &[u8],
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let engine = self.handshake.as_mut().ok_or(ConnectionError::InvalidState {
            state: self.state,
            operation: "handshake message",
        })?;
        match engine.consume(payload)? {
            HandshakeOutcome::Reply(message) => {
                Ok(vec![ConnectionAction::SendBytes(frame_bytes(&message)?)])
            }
            HandshakeOutcome::Established { reply, keys } => {
                let mut actions = Vec::new();
                if let Some(message) = reply {
                    actions.push(ConnectionAction::SendBytes(frame_bytes(&message)?));
                }
                self.server_identity =
                    self.handshake.as_ref().and_then(HandshakeEngine::remote_static);
                self.handshake = None;
                self.cipher = Some(FrameCipher::new(*keys));
                self.enter(ConnectionState::Authenticating, now);

                let login = self.build_auth_node();
                actions.push(ConnectionAction::SendBytes(self.seal_node(&login)?));
                debug!("handshake complete, login sent");
                Ok(actions)
            }
        }
    }

    fn handle_auth_frame(
        &mut self,
        payload: &[u8],
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let node = self.open_node(payload)?;
        match node.tag() {
            "success" => {
                self.assigned_jid = node.attr("jid").and_then(|s| s.parse().ok());
                self.enter(ConnectionState::Open, now);
                self.last_activity = now;
                debug!(jid = ?self.assigned_jid, "login accepted");
                Ok(vec![ConnectionAction::Notify(LifecycleEvent::Established {
                    jid: self.assigned_jid.clone(),
                })])
            }
            "failure" => {
                let code = node.attr("code").and_then(|c| c.parse().ok()).unwrap_or(0);
                warn!(code, reason = node.attr("reason"), "login rejected");
                Ok(self.fail(CloseReason::AuthRejected { code }))
            }
            tag => Err(ConnectionError::UnexpectedNode {
                tag: tag.to_owned(),
                state: self.state,
            }),
        }
    }

    fn handle_open_frame(
        &mut self,
        payload: &[u8],
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let node = self.open_node(payload)?;
        self.last_activity = now;

        // Our own keepalive coming back.
        let is_our_pong = self
            .ping_outstanding
            .as_ref()
            .is_some_and(|(id, _)| node.tag() == "iq" && node.attr("id") == Some(id.as_str()));
        if is_our_pong {
            self.ping_outstanding = None;
            return Ok(vec![]);
        }

        // Server-initiated ping; answer and stop there.
        if node.tag() == "iq"
            && node.attr("xmlns") == Some("urn:tl:ping")
            && node.attr("type") == Some("get")
        {
            let mut pong = Node::new("iq").with_attr("type", "result");
            if let Some(id) = node.attr("id") {
                pong = pong.with_attr("id", id);
            }
            return Ok(vec![ConnectionAction::SendBytes(self.seal_node(&pong)?)]);
        }

        Ok(vec![ConnectionAction::Publish(node)])
    }

    fn tick_keepalive(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if let Some((_, sent)) = &self.ping_outstanding {
            if now.duration_since(*sent) > self.config.keepalive_timeout {
                warn!("keepalive went unanswered");
                return self.fail(CloseReason::Timeout);
            }
            return vec![];
        }
        if now.duration_since(self.last_activity) < self.config.keepalive_interval {
            return vec![];
        }

        self.ping_seq += 1;
        let id = format!("ka-{}", self.ping_seq);
        let ping = Node::single(
            "iq",
            Node::new("ping"),
        )
        .with_attr("id", id.clone())
        .with_attr("type", "get")
        .with_attr("xmlns", "urn:tl:ping");

        match self.seal_node(&ping) {
            Ok(bytes) => {
                self.ping_outstanding = Some((id, now));
                self.last_activity = now;
                vec![ConnectionAction::SendBytes(bytes)]
            }
            Err(error) => {
                warn!(%error, "failed to seal keepalive");
                self.fail(error.close_reason())
            }
        }
    }

    fn build_auth_node(&self) -> Node {
        let mut login = Node::new("auth").with_attr("token", self.auth.token.clone());
        if let Some(jid) = &self.auth.jid {
            login = login.with_attr("jid", jid.to_string());
        }
        login
    }

    /// Encode, encrypt, and frame one outbound node.
    fn seal_node(&mut self, node: &Node) -> Result<Bytes, ConnectionError> {
        let plaintext = encode(node)?;
        let cipher = self.cipher.as_mut().ok_or(ConnectionError::InvalidState {
            state: self.state,
            operation: "seal_node",
        })?;
        let sealed = cipher.seal(&plaintext)?;
        frame_bytes(&sealed)
    }

    /// Decrypt and decode one inbound frame body.
    fn open_node(&mut self, payload: &[u8]) -> Result<Node, ConnectionError> {
        let cipher = self.cipher.as_mut().ok_or(ConnectionError::InvalidState {
            state: self.state,
            operation: "open_node",
        })?;
        let plaintext = cipher.open(payload)?;
        Ok(decode(&plaintext)?)
    }
}

fn frame_bytes(payload: &[u8]) -> Result<Bytes, ConnectionError> {
    let mut out = BytesMut::new();
    encode_frame(payload, &mut out)?;
    Ok(out.freeze())
}
