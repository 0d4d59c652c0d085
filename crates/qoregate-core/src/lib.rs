// SPDX-License-Identifier: Apache-2.0

//! QoreGate core
//!
//! Primitives shared by the interception engine: the wire-message model,
//! cancellable event rendezvous and session identity resolution.

pub mod document;
pub mod error;
pub mod event;
pub mod session;
pub mod types;

pub use document::{command_name, first_key_in, is_truthy};
pub use error::{GateError, GateResult};
pub use event::{wait_event, CancellationToken, EventChannel, EventListener};
pub use session::{resolve_session_id, ClientSessionHandle, ServerSessionId, SessionIdentity};
pub use types::{
    CommandOptions, OpGetMore, OpKillCursors, OpMsg, OpQuery, Phase, RunCommandStep, WireMessage,
};
