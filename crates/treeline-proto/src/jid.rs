//! Phone-number-shaped identifiers (JIDs).
//!
//! A JID addresses a user on a server, optionally qualified by a device index
//! and an agent index: `user[.agent][:device]@server`. Index `0` means the
//! primary device/agent and is omitted from the string form.
//!
//! On the wire, attribute values that are canonical JIDs are encoded as
//! packed fields (see [`tokens::JID_PAIR`](crate::tokens::JID_PAIR) and
//! [`tokens::DEVICE_JID`](crate::tokens::DEVICE_JID)) rather than literal
//! strings, and recovered losslessly on decode.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A parsed JID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Jid {
    /// User part (typically a phone number; may be empty for server JIDs).
    pub user: String,
    /// Server part (never empty).
    pub server: String,
    /// Device index; `0` is the primary device.
    pub device: u8,
    /// Agent index; `0` is the primary agent.
    pub agent: u8,
}

/// Error returned when a string is not a well-formed JID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid jid: {0}")]
pub struct JidParseError(&'static str);

impl Jid {
    /// A plain user JID on the given server.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self { user: user.into(), server: server.into(), device: 0, agent: 0 }
    }

    /// Whether this JID addresses a specific non-primary device or agent.
    #[must_use]
    pub fn is_device_qualified(&self) -> bool {
        self.device != 0 || self.agent != 0
    }

    /// Whether `s` parses as a JID whose canonical form is `s` itself.
    ///
    /// Only canonical strings are eligible for the packed wire encoding,
    /// which guarantees `decode(encode(n)) == n`.
    #[must_use]
    pub fn canonical(s: &str) -> Option<Self> {
        let jid = s.parse::<Self>().ok()?;
        (jid.to_string() == s).then_some(jid)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)?;
        if self.agent != 0 {
            write!(f, ".{}", self.agent)?;
        }
        if self.device != 0 {
            write!(f, ":{}", self.device)?;
        }
        write!(f, "@{}", self.server)
    }
}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, server) =
            s.split_once('@').ok_or(JidParseError("missing '@' separator"))?;
        if server.is_empty() || server.contains('@') {
            return Err(JidParseError("empty or nested server part"));
        }

        let (local, device) = match local.split_once(':') {
            Some((rest, device)) => {
                let device =
                    device.parse::<u8>().map_err(|_| JidParseError("device index out of range"))?;
                (rest, device)
            },
            None => (local, 0),
        };

        let (user, agent) = match local.split_once('.') {
            Some((user, agent)) => {
                let agent =
                    agent.parse::<u8>().map_err(|_| JidParseError("agent index out of range"))?;
                (user, agent)
            },
            None => (local, 0),
        };

        Ok(Self { user: user.to_string(), server: server.to_string(), device, agent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_jid_round_trips() {
        let jid: Jid = "15551234567@tl.net".parse().unwrap();
        assert_eq!(jid, Jid::new("15551234567", "tl.net"));
        assert_eq!(jid.to_string(), "15551234567@tl.net");
    }

    #[test]
    fn device_and_agent_round_trip() {
        let jid: Jid = "15551234567.2:11@tl.net".parse().unwrap();
        assert_eq!(jid.agent, 2);
        assert_eq!(jid.device, 11);
        assert!(jid.is_device_qualified());
        assert_eq!(jid.to_string(), "15551234567.2:11@tl.net");
    }

    #[test]
    fn server_jid_allows_empty_user() {
        let jid: Jid = "@g.tl.net".parse().unwrap();
        assert_eq!(jid.user, "");
        assert_eq!(jid.server, "g.tl.net");
    }

    #[test]
    fn rejects_garbage() {
        assert!("no-separator".parse::<Jid>().is_err());
        assert!("a@".parse::<Jid>().is_err());
        assert!("a@b@c".parse::<Jid>().is_err());
        assert!("a:999@b".parse::<Jid>().is_err());
        assert!("a.xyz@b".parse::<Jid>().is_err());
    }

    #[test]
    fn canonical_rejects_zero_suffixes() {
        // ":0" parses (device 0) but its canonical form omits the suffix,
        // so it is not eligible for packed encoding.
        assert!(Jid::canonical("123:0@tl.net").is_none());
        assert!(Jid::canonical("123@tl.net").is_some());
        assert!(Jid::canonical("123.1:4@tl.net").is_some());
    }
}
