//! The driver task: owns the connection state machine and all I/O.
//!
//! Exactly one task per client touches the socket, the cipher state, and the
//! pending-request table, so none of them need locks. Application handles
//! talk to the driver over a command channel; responses travel back on
//! per-request oneshots.
//!
//! The driver also owns the reconnect loop. Every attempt builds a brand new
//! [`Connection`], so handshake state, session keys, and request ids never
//! leak across incarnations.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};
use treeline_core::connection::{
    AuthConfig, Connection, ConnectionAction, ConnectionState,
};
use treeline_core::error::{CloseReason, RequestError, SendError};
use treeline_core::events::{LifecycleEvent, SubscriptionFilter, SubscriptionRegistry};
use treeline_core::pending::PendingRequestTable;
use treeline_core::retry::Backoff;
use treeline_core::transport::Transport;
use treeline_proto::{FrameBuffer, Node};

use crate::client::ClientConfig;
use crate::identity::{Credentials, CredentialStore};

/// What client handles ask the driver to do.
pub(crate) enum Command {
    Request {
        node: Node,
        /// Per-call deadline; `None` uses the configured default.
        timeout: Option<std::time::Duration>,
        reply: oneshot::Sender<Result<Node, RequestError>>,
    },
    Send {
        node: Node,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Subscribe {
        filter: SubscriptionFilter,
        reply: oneshot::Sender<mpsc::UnboundedReceiver<Node>>,
    },
    Close,
}

/// How one connection incarnation ended.
struct ConnectionOutcome {
    reason: CloseReason,
    was_open: bool,
    local_close: bool,
}

pub(crate) struct Driver<T: Transport> {
    transport: T,
    credentials: Credentials,
    store: Arc<dyn CredentialStore>,
    config: ClientConfig,
    commands: mpsc::Receiver<Command>,
    lifecycle: watch::Sender<LifecycleEvent>,
    subscriptions: SubscriptionRegistry,
    backoff: Backoff,
}

impl<T: Transport> Driver<T> {
    pub(crate) fn new(
        transport: T,
        credentials: Credentials,
        store: Arc<dyn CredentialStore>,
        config: ClientConfig,
        commands: mpsc::Receiver<Command>,
        lifecycle: watch::Sender<LifecycleEvent>,
    ) -> Self {
        let backoff = config.backoff.clone();
        Self {
            transport,
            credentials,
            store,
            config,
            commands,
            lifecycle,
            subscriptions: SubscriptionRegistry::new(),
            backoff,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let outcome = self.run_connection().await;
            if outcome.was_open {
                self.backoff.reset();
            }
            if outcome.local_close
                || !outcome.reason.is_recoverable()
                || !self.config.reconnect
            {
                debug!(reason = ?outcome.reason, "driver stopping");
                return;
            }

            let exhausted = self
                .config
                .max_reconnect_attempts
                .is_some_and(|max| self.backoff.attempt() >= max);
            if exhausted {
                warn!(attempts = self.backoff.attempt(), "reconnect attempts exhausted");
                return;
            }

            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            debug!(attempt, ?delay, "scheduling reconnect");
            let _ = self.lifecycle.send(LifecycleEvent::Reconnecting { attempt, delay });
            if !self.wait_backoff(delay).await {
                return;
            }
        }
    }

    /// Drive one connection from dial to teardown.
    async fn run_connection(&mut self) -> ConnectionOutcome {
        let Self { transport, credentials, store, config, commands, lifecycle, subscriptions, .. } =
            self;

        let now = Instant::now();
        let mut conn = Connection::new(
            now,
            config.connection.clone(),
            credentials.keypair(),
            AuthConfig { token: credentials.token.clone(), jid: credentials.jid.clone() },
        );
        let mut pending = PendingRequestTable::new();

        // A fresh connection always accepts start; surface the Connecting
        // notification and dial.
        match conn.start(now) {
            Ok(actions) => {
                for action in actions {
                    if let ConnectionAction::Notify(event) = action {
                        let _ = lifecycle.send(event);
                    }
                }
            }
            Err(error) => {
                warn!(%error, "connection refused to start");
                return ConnectionOutcome {
                    reason: CloseReason::Protocol,
                    was_open: false,
                    local_close: false,
                };
            }
        }

        let (mut writer, mut reader) = match transport.connect().await {
            Ok(halves) => halves,
            Err(error) => {
                warn!(%error, "dial failed");
                for action in conn.transport_closed(CloseReason::Transport) {
                    if let ConnectionAction::Notify(event) = action {
                        let _ = lifecycle.send(event);
                    }
                }
                return ConnectionOutcome {
                    reason: CloseReason::Transport,
                    was_open: false,
                    local_close: false,
                };
            }
        };

        let mut frames = FrameBuffer::new();
        let mut read_buf = BytesMut::with_capacity(16 * 1024);
        let mut ticker = tokio::time::interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut was_open = false;
        let mut local_close = false;

        // Handshake begins as soon as the transport is up.
        let first = match conn.transport_connected(Instant::now()) {
            Ok(actions) => {
                apply_actions(actions, &mut writer, lifecycle, subscriptions, &mut pending).await
            }
            Err(error) => {
                warn!(%error, "handshake start failed");
                Ok(Applied::Teardown(error.close_reason()))
            }
        };

        let reason = 'conn: {
            match first {
                Ok(Applied::Continue) => {}
                Ok(Applied::Teardown(reason)) => break 'conn reason,
                Err(error) => {
                    warn!(%error, "transport failure");
                    break 'conn CloseReason::Transport;
                }
            }

            loop {
                let step: Result<Applied, std::io::Error> = tokio::select! {
                    result = reader.read_buf(&mut read_buf) => match result {
                        Ok(0) => {
                            debug!("peer closed the stream");
                            Ok(Applied::Teardown(CloseReason::Transport))
                        }
                        Ok(_) => {
                            frames.extend(&read_buf.split());
                            let mut step = Ok(Applied::Continue);
                            while let Some(frame) = frames.next_frame() {
                                let now = Instant::now();
                                let actions = match conn.handle_frame(&frame, now) {
                                    Ok(actions) => actions,
                                    Err(error) => {
                                        warn!(%error, "inbound frame rejected");
                                        conn.fail(error.close_reason())
                                    }
                                };
                                match apply_actions(
                                    actions, &mut writer, lifecycle, subscriptions, &mut pending,
                                )
                                .await
                                {
                                    Ok(Applied::Continue) => {}
                                    other => {
                                        step = other;
                                        break;
                                    }
                                }
                            }
                            if !was_open && conn.state() == ConnectionState::Open {
                                was_open = true;
                                credentials.jid = conn.assigned_jid().cloned();
                                if let Err(error) = store.save(credentials) {
                                    warn!(%error, "credential save failed");
                                }
                            }
                            step
                        }
                        Err(error) => Err(error),
                    },

                    command = commands.recv() => match command {
                        None | Some(Command::Close) => {
                            local_close = true;
                            let actions = conn.close(Instant::now());
                            apply_actions(actions, &mut writer, lifecycle, subscriptions, &mut pending)
                                .await
                        }
                        Some(Command::Request { node, timeout, reply }) => {
                            if conn.state() == ConnectionState::Open {
                                let now = Instant::now();
                                // A caller-supplied id is kept; one is minted
                                // only when the node carries none.
                                let id = match node.attr("id") {
                                    Some(id) => id.to_owned(),
                                    None => pending.next_id(),
                                };
                                let node = node.with_attr("id", id.clone());
                                let deadline =
                                    now + timeout.unwrap_or(config.request_timeout);
                                match conn.send_node(&node, now) {
                                    Ok(actions) => {
                                        pending.register(id, reply, deadline);
                                        apply_actions(
                                            actions, &mut writer, lifecycle, subscriptions,
                                            &mut pending,
                                        )
                                        .await
                                    }
                                    Err(error) => {
                                        warn!(%error, "request send failed");
                                        let _ = reply.send(Err(RequestError::ConnectionClosed));
                                        Ok(Applied::Continue)
                                    }
                                }
                            } else {
                                let _ = reply.send(Err(RequestError::ConnectionClosed));
                                Ok(Applied::Continue)
                            }
                        }
                        Some(Command::Send { node, reply }) => {
                            match conn.send_node(&node, Instant::now()) {
                                Ok(actions) => {
                                    let _ = reply.send(Ok(()));
                                    apply_actions(
                                        actions, &mut writer, lifecycle, subscriptions, &mut pending,
                                    )
                                    .await
                                }
                                Err(_) => {
                                    let _ = reply.send(Err(SendError::NotOpen));
                                    Ok(Applied::Continue)
                                }
                            }
                        }
                        Some(Command::Subscribe { filter, reply }) => {
                            let _ = reply.send(subscriptions.subscribe(filter));
                            Ok(Applied::Continue)
                        }
                    },

                    _ = ticker.tick() => {
                        let now = Instant::now();
                        pending.expire(now);
                        apply_actions(conn.tick(now), &mut writer, lifecycle, subscriptions, &mut pending)
                            .await
                    }
                };

                match step {
                    Ok(Applied::Continue) => {}
                    Ok(Applied::Teardown(reason)) => break 'conn reason,
                    Err(error) => {
                        warn!(%error, "transport failure");
                        break 'conn CloseReason::Transport;
                    }
                }
            }
        };

        let _ = writer.shutdown().await;
        for action in conn.transport_closed(reason.clone()) {
            if let ConnectionAction::Notify(event) = action {
                let _ = lifecycle.send(event);
            }
        }
        pending.fail_all(&RequestError::ConnectionClosed);
        ConnectionOutcome { reason, was_open, local_close }
    }

    /// Sleep out the backoff while keeping command handling responsive.
    ///
    /// Returns `false` if the client asked to stop.
    async fn wait_backoff(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => {
                        let _ = self
                            .lifecycle
                            .send(LifecycleEvent::Closed(CloseReason::LocalRequest));
                        return false;
                    }
                    Some(Command::Request { reply, .. }) => {
                        let _ = reply.send(Err(RequestError::ConnectionClosed));
                    }
                    Some(Command::Send { reply, .. }) => {
                        let _ = reply.send(Err(SendError::NotOpen));
                    }
                    Some(Command::Subscribe { filter, reply }) => {
                        let _ = reply.send(self.subscriptions.subscribe(filter));
                    }
                },
            }
        }
    }
}

enum Applied {
    Continue,
    Teardown(CloseReason),
}

/// Execute state machine actions against the live transport.
async fn apply_actions<W: AsyncWrite + Unpin>(
    actions: Vec<ConnectionAction>,
    writer: &mut W,
    lifecycle: &watch::Sender<LifecycleEvent>,
    subscriptions: &mut SubscriptionRegistry,
    pending: &mut PendingRequestTable,
) -> Result<Applied, std::io::Error> {
    for action in actions {
        match action {
            // Dialing is handled before the loop starts.
            ConnectionAction::Connect => {}
            ConnectionAction::SendBytes(bytes) => writer.write_all(&bytes).await?,
            ConnectionAction::Publish(node) => {
                if !pending.resolve(&node) {
                    let delivered = subscriptions.publish(&node);
                    if delivered == 0 {
                        trace!(tag = node.tag(), "push had no listeners");
                    }
                }
            }
            ConnectionAction::Notify(event) => {
                let _ = lifecycle.send(event);
            }
            ConnectionAction::Close(reason) => return Ok(Applied::Teardown(reason)),
        }
    }
    Ok(Applied::Continue)
}
