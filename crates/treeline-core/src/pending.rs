//! Correlation of request nodes with their response nodes.
//!
//! Every outbound request carries a connection-unique `id` attribute; the
//! server echoes it on the response. The table maps ids to waiting callers
//! and enforces per-request deadlines, so one slow request never delays the
//! others.

use std::collections::HashMap;
use std::time::Instant;

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::oneshot;
use treeline_proto::Node;

use crate::error::RequestError;

/// One waiting caller.
struct PendingEntry {
    reply: oneshot::Sender<Result<Node, RequestError>>,
    deadline: Instant,
}

/// Outstanding requests awaiting responses.
///
/// Ids are a random per-connection prefix plus a monotonic counter. The
/// prefix keeps ids from one connection incarnation colliding with a stale
/// response from a previous one.
pub struct PendingRequestTable {
    prefix: String,
    next_seq: u64,
    entries: HashMap<String, PendingEntry>,
}

impl PendingRequestTable {
    /// A fresh table with a random id prefix.
    #[must_use]
    pub fn new() -> Self {
        let mut prefix_bytes = [0u8; 4];
        OsRng.fill_bytes(&mut prefix_bytes);
        let prefix = prefix_bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self { prefix, next_seq: 1, entries: HashMap::new() }
    }

    /// Mint the next request id.
    pub fn next_id(&mut self) -> String {
        let id = format!("{}-{}", self.prefix, self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Register a caller waiting for the response to `id`.
    pub fn register(
        &mut self,
        id: String,
        reply: oneshot::Sender<Result<Node, RequestError>>,
        deadline: Instant,
    ) {
        self.entries.insert(id, PendingEntry { reply, deadline });
    }

    /// Route an inbound node to its waiting caller by `id` attribute.
    ///
    /// Returns `true` if a caller consumed the node. Response nodes of type
    /// `error` (or carrying an `error` child) resolve the caller with
    /// [`RequestError::RemoteError`].
    pub fn resolve(&mut self, node: &Node) -> bool {
        let Some(id) = node.attr("id") else {
            return false;
        };
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        let outcome = match remote_error(node) {
            Some(error) => Err(error),
            None => Ok(node.clone()),
        };
        // The caller may have given up; either way the node is consumed.
        let _ = entry.reply.send(outcome);
        true
    }

    /// Time out every request whose deadline has passed, and drop entries
    /// whose caller went away. Returns the number of requests timed out.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.entries.retain(|id, entry| {
            if entry.reply.is_closed() {
                return false;
            }
            if now >= entry.deadline {
                expired.push(id.clone());
                return true; // removed below so the sender can be moved out
            }
            true
        });
        let count = expired.len();
        for id in expired {
            if let Some(entry) = self.entries.remove(&id) {
                let _ = entry.reply.send(Err(RequestError::Timeout));
            }
        }
        count
    }

    /// Fail every outstanding request, for connection teardown.
    pub fn fail_all(&mut self, error: &RequestError) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(Err(error.clone()));
        }
    }

    /// Outstanding request count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingRequestTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract a remote error from a response node, if it carries one.
fn remote_error(node: &Node) -> Option<RequestError> {
    let error_node = if node.attr("type") == Some("error") {
        node.child("error").or(Some(node))
    } else {
        node.child("error")
    }?;
    let code = error_node.attr("code").and_then(|c| c.parse().ok()).unwrap_or(0);
    let text = error_node.attr("reason").map(str::to_owned);
    Some(RequestError::RemoteError { code, text })
}
