//! Sans-IO connection engine for the Treeline protocol.
//!
//! [`Connection`] is a pure state machine: it takes inbound frame payloads
//! and the current time, and returns [`ConnectionAction`]s for a driver to
//! execute. No sockets, no timers, no RNG hidden inside (key generation
//! excepted). That keeps every lifecycle path, including the unpleasant
//! ones, testable with plain synchronous unit tests.
//!
//! The supporting pieces are deliberately free-standing so the driver
//! composes them: [`PendingRequestTable`] correlates requests with
//! responses, [`SubscriptionRegistry`] fans out server pushes, [`Backoff`]
//! paces reconnects, and [`Transport`] abstracts the byte stream.

pub mod connection;
pub mod error;
pub mod events;
pub mod pending;
pub mod retry;
pub mod transport;

pub use connection::{AuthConfig, Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use error::{CloseReason, ConnectionError, RequestError, SendError, TransportError};
pub use events::{LifecycleEvent, SubscriptionFilter, SubscriptionRegistry};
pub use pending::PendingRequestTable;
pub use retry::Backoff;
pub use transport::Transport;
