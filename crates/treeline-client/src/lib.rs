//! Async client runtime for the Treeline protocol.
//!
//! Wraps the sans-IO engine from `treeline-core` in a tokio driver task and
//! exposes a small handle: [`Client::request`] for request/response,
//! [`Client::subscribe`] for server pushes, [`Client::lifecycle`] for
//! connection state. The driver owns the socket and every piece of mutable
//! connection state; handles are cheap clones of a command channel.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use treeline_client::{
//!     Client, ClientConfig, CredentialStore, Credentials, FileCredentialStore, TcpTransport,
//! };
//! use treeline_proto::Node;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FileCredentialStore::new("credentials.cbor"));
//! let credentials = match store.load()? {
//!     Some(existing) => existing,
//!     None => Credentials::generate("registration-token"),
//! };
//! let client = Client::connect(
//!     TcpTransport::new("gateway.tl.net:443"),
//!     credentials,
//!     store,
//!     ClientConfig::default(),
//! );
//! let response = client.request(Node::new("iq").with_attr("type", "get")).await?;
//! println!("{}", response.tag());
//! # Ok(())
//! # }
//! ```

pub mod client;
mod driver;
pub mod identity;
pub mod tcp;

pub use client::{Client, ClientConfig};
pub use identity::{
    CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore, StoreError,
};
pub use tcp::TcpTransport;

pub use treeline_core::error::{CloseReason, RequestError, SendError};
pub use treeline_core::events::{LifecycleEvent, SubscriptionFilter};
