//! Connection state machine and auth levels (spec §3, §4.2).

use std::fmt;

/// {NEW, CONNECTED, ESTABLISHED, DISCONNECTED}. DISCONNECTED is terminal;
/// every other state can transition to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    New,
    Connected,
    Established,
    Disconnected,
}

impl ConnState {
    /// Sending and receiving are only legal while the transport is up.
    #[must_use]
    pub fn can_exchange_frames(self) -> bool {
        matches!(self, ConnState::Connected | ConnState::Established)
    }

    /// Numeric wire value reported to clients (e.g. `listClients`'s
    /// `state` field).
    #[must_use]
    pub fn as_code(self) -> u8 {
        match self {
            ConnState::New => 0,
            ConnState::Connected => 1,
            ConnState::Established => 2,
            ConnState::Disconnected => 3,
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::New => "NEW",
            ConnState::Connected => "CONNECTED",
            ConnState::Established => "ESTABLISHED",
            ConnState::Disconnected => "DISCONNECTED",
        };
        write!(f, "{s}")
    }
}

/// NONE is default and permits only listener-flow commands; MASTER and
/// ADMIN short-circuit ACL checks entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    None,
    Master,
    Admin,
    Operator,
    User,
}

impl AuthLevel {
    #[must_use]
    pub fn bypasses_acl(self) -> bool {
        matches!(self, AuthLevel::Master | AuthLevel::Admin)
    }

    /// Numeric wire value (e.g. `listClients`'s `authType` field and
    /// `authUser`'s `role` field).
    #[must_use]
    pub fn as_code(self) -> u8 {
        match self {
            AuthLevel::None => 0,
            AuthLevel::Master => 1,
            AuthLevel::Admin => 2,
            AuthLevel::Operator => 3,
            AuthLevel::User => 4,
        }
    }
}
