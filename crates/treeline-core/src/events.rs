//! Lifecycle notifications and the push subscription registry.
//!
//! Servers push unsolicited nodes (messages, presence, notifications) at any
//! time. The registry fans those out to interested listeners by tag and by
//! the node's `category` attribute; closed listeners are dropped on the next
//! publish.

use std::time::Duration;

use tokio::sync::mpsc;
use treeline_proto::{Jid, Node};

use crate::error::CloseReason;

/// Coarse connection lifecycle, reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A connection attempt has started.
    Connecting,
    /// The handshake and login completed; requests can flow.
    Established {
        /// Address assigned by the server during login, if any.
        jid: Option<Jid>,
    },
    /// The connection was lost and a retry is scheduled.
    Reconnecting {
        /// 1-based attempt counter since the last established connection.
        attempt: u32,
        /// Delay before the attempt begins.
        delay: Duration,
    },
    /// The connection is gone and no retry is scheduled.
    Closed(CloseReason),
}

/// What a subscriber wants to receive. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Only nodes with this tag.
    pub tag: Option<String>,
    /// Only nodes whose `category` attribute equals this value.
    pub category: Option<String>,
}

impl SubscriptionFilter {
    /// Match every pushed node.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Match nodes with the given tag.
    #[must_use]
    pub fn for_tag(tag: impl Into<String>) -> Self {
        Self { tag: Some(tag.into()), category: None }
    }

    /// Restrict an existing filter to one `category` attribute value.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn matches(&self, node: &Node) -> bool {
        let tag_ok = self.tag.as_deref().is_none_or(|tag| node.tag() == tag);
        let category_ok = self
            .category
            .as_deref()
            .is_none_or(|category| node.attr("category") == Some(category));
        tag_ok && category_ok
    }
}

/// Fan-out of server-pushed nodes to application listeners.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscribers: Vec<(SubscriptionFilter, mpsc::UnboundedSender<Node>)>,
}

impl SubscriptionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; pushed nodes matching `filter` arrive on the
    /// returned channel. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self, filter: SubscriptionFilter) -> mpsc::UnboundedReceiver<Node> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((filter, tx));
        rx
    }

    /// Deliver a pushed node to every matching listener.
    ///
    /// Returns how many listeners received it. Listeners whose receiver has
    /// been dropped are removed.
    pub fn publish(&mut self, node: &Node) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|(filter, tx)| {
            if filter.matches(node) {
                if tx.send(node.clone()).is_ok() {
                    delivered += 1;
                    true
                } else {
                    false
                }
            } else {
                !tx.is_closed()
            }
        });
        delivered
    }

    /// Active listener count (diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
