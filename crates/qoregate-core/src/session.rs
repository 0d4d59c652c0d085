// SPDX-License-Identifier: Apache-2.0

//! Session identity resolution.
//!
//! Call sites identify the session a command belongs to in one of three
//! ways. All of them collapse to a single canonical string key, or to
//! nothing when the command runs outside any session.

use uuid::Uuid;

/// Server-side logical session id (the `lsid` sent with commands)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerSessionId(pub Uuid);

impl ServerSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Undashed lowercase hex form used as the session key.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for ServerSessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Client session handle; may not have acquired a server session yet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSessionHandle {
    pub server_session: Option<ServerSessionId>,
}

impl ClientSessionHandle {
    pub fn new(server_session: ServerSessionId) -> Self {
        Self {
            server_session: Some(server_session),
        }
    }
}

/// The ways a call site can name its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdentity {
    ExplicitId(String),
    Session(ClientSessionHandle),
    ServerSession(ServerSessionId),
}

impl SessionIdentity {
    pub fn resolve(&self) -> Option<String> {
        match self {
            Self::ExplicitId(id) if id.is_empty() => None,
            Self::ExplicitId(id) => Some(id.clone()),
            Self::Session(handle) => handle.server_session.as_ref().map(ServerSessionId::to_hex),
            Self::ServerSession(id) => Some(id.to_hex()),
        }
    }
}

impl From<&str> for SessionIdentity {
    fn from(id: &str) -> Self {
        Self::ExplicitId(id.to_string())
    }
}

impl From<String> for SessionIdentity {
    fn from(id: String) -> Self {
        Self::ExplicitId(id)
    }
}

impl From<ClientSessionHandle> for SessionIdentity {
    fn from(handle: ClientSessionHandle) -> Self {
        Self::Session(handle)
    }
}

impl From<ServerSessionId> for SessionIdentity {
    fn from(id: ServerSessionId) -> Self {
        Self::ServerSession(id)
    }
}

/// Resolves any identity (or its absence) to the canonical session key.
pub fn resolve_session_id(identity: Option<&SessionIdentity>) -> Option<String> {
    identity.and_then(SessionIdentity::resolve)
}
