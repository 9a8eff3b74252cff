//! The application-facing client handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use treeline_core::connection::ConnectionConfig;
use treeline_core::error::{RequestError, SendError};
use treeline_core::events::{LifecycleEvent, SubscriptionFilter};
use treeline_core::retry::Backoff;
use treeline_core::transport::Transport;
use treeline_proto::Node;

use crate::driver::{Command, Driver};
use crate::identity::{Credentials, CredentialStore};

/// Client-level knobs on top of the per-connection timing in
/// [`ConnectionConfig`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Per-connection timing.
    pub connection: ConnectionConfig,
    /// Default deadline for each request's response.
    pub request_timeout: Duration,
    /// Whether recoverable disconnects trigger automatic reconnects.
    pub reconnect: bool,
    /// Give up after this many consecutive failed reconnect attempts.
    /// `None` retries for as long as the failure stays recoverable.
    pub max_reconnect_attempts: Option<u32>,
    /// Reconnect pacing.
    pub backoff: Backoff,
    /// How often deadlines are checked. Bounds how late a timeout fires.
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            request_timeout: Duration::from_secs(20),
            reconnect: true,
            max_reconnect_attempts: None,
            backoff: Backoff::default(),
            tick_interval: Duration::from_millis(500),
        }
    }
}

/// Handle to a running client.
///
/// Cheap to clone; all clones talk to the same driver task. The connection
/// itself lives in that single task, so there is no shared mutable state to
/// lock.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    lifecycle: watch::Receiver<LifecycleEvent>,
}

impl Client {
    /// Start a client over `transport` and return the handle immediately.
    ///
    /// The driver task dials, handshakes, and logs in on its own; watch
    /// [`Client::lifecycle`] or just issue requests (they fail fast with
    /// [`RequestError::ConnectionClosed`] until the connection is open).
    pub fn connect<T: Transport>(
        transport: T,
        credentials: Credentials,
        store: Arc<dyn CredentialStore>,
        config: ClientConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (lifecycle_tx, lifecycle_rx) = watch::channel(LifecycleEvent::Connecting);
        let driver = Driver::new(transport, credentials, store, config, commands_rx, lifecycle_tx);
        tokio::spawn(driver.run());
        Self { commands: commands_tx, lifecycle: lifecycle_rx }
    }

    /// Send a request node and await its correlated response.
    ///
    /// The driver stamps a unique `id` attribute if the node does not carry
    /// one; a caller-set `id` is preserved and must be unique among requests
    /// in flight. Responses of type `error` surface as
    /// [`RequestError::RemoteError`]. The deadline is
    /// [`ClientConfig::request_timeout`].
    pub async fn request(&self, node: Node) -> Result<Node, RequestError> {
        self.request_inner(node, None).await
    }

    /// Like [`Client::request`], with a per-call deadline.
    pub async fn request_with_timeout(
        &self,
        node: Node,
        timeout: Duration,
    ) -> Result<Node, RequestError> {
        self.request_inner(node, Some(timeout)).await
    }

    async fn request_inner(
        &self,
        node: Node,
        timeout: Option<Duration>,
    ) -> Result<Node, RequestError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request { node, timeout, reply })
            .await
            .map_err(|_| RequestError::ConnectionClosed)?;
        response.await.map_err(|_| RequestError::ConnectionClosed)?
    }

    /// Send a node without waiting for any response.
    pub async fn send(&self, node: Node) -> Result<(), SendError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Send { node, reply })
            .await
            .map_err(|_| SendError::ConnectionClosed)?;
        outcome.await.map_err(|_| SendError::ConnectionClosed)?
    }

    /// Subscribe to server-pushed nodes matching `filter`.
    ///
    /// Dropping the returned receiver unsubscribes.
    pub async fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> Result<mpsc::UnboundedReceiver<Node>, RequestError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { filter, reply })
            .await
            .map_err(|_| RequestError::ConnectionClosed)?;
        receiver.await.map_err(|_| RequestError::ConnectionClosed)
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn lifecycle(&self) -> watch::Receiver<LifecycleEvent> {
        self.lifecycle.clone()
    }

    /// Ask the driver to close gracefully. Outstanding requests fail with
    /// [`RequestError::ConnectionClosed`].
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// Wait until the client reaches a terminal closed state.
    pub async fn closed(&self) {
        let mut lifecycle = self.lifecycle.clone();
        loop {
            if matches!(*lifecycle.borrow(), LifecycleEvent::Closed(_)) {
                return;
            }
            if lifecycle.changed().await.is_err() {
                return;
            }
        }
    }
}
