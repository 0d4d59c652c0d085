// SPDX-License-Identifier: Apache-2.0

//! Core types shared by gates, contexts, and the capture controller

use std::fmt;

use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::document::command_name;
use crate::error::{GateError, GateResult};

/// Interception point around a single round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Before the command is written to the socket
    Pre,
    /// After the server reply has been read
    Post,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle step of a run-command context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunCommandStep {
    #[default]
    None,
    Pre,
    Post,
    Exception,
    Complete,
}

impl RunCommandStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Pre => "PRE",
            Self::Post => "POST",
            Self::Exception => "EXCEPTION",
            Self::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for RunCommandStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options a call site hands to the interception layer
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Bypass interception unconditionally, even while capturing.
    ///
    /// Set by commands the client issues on its own behalf (handshakes,
    /// monitoring) so the client can never wait on itself.
    pub bypass_interception: bool,
    /// Force the filter chain to skip this one call regardless of content.
    pub skip_interception: bool,
    /// Cancels the caller's wait while its command is paused.
    pub cancellation: Option<CancellationToken>,
}

impl CommandOptions {
    /// Options for internally issued commands that must never pause.
    pub fn no_pause() -> Self {
        Self {
            bypass_interception: true,
            ..Default::default()
        }
    }

    /// Options that make the filter chain skip exactly this call.
    pub fn skipped() -> Self {
        Self {
            skip_interception: true,
            ..Default::default()
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Modern command message (OP_MSG)
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    pub database: String,
    pub command: Document,
}

/// Legacy query message (OP_QUERY)
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    pub ns: String,
    pub query: Document,
}

/// Legacy cursor continuation (OP_GET_MORE)
#[derive(Debug, Clone, PartialEq)]
pub struct OpGetMore {
    pub ns: String,
    pub cursor_id: i64,
}

/// Legacy cursor release (OP_KILL_CURSORS)
#[derive(Debug, Clone, PartialEq)]
pub struct OpKillCursors {
    pub ns: String,
    pub cursor_ids: Vec<i64>,
}

/// A message about to be written by the protocol layer
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Msg(OpMsg),
    Query(OpQuery),
    GetMore(OpGetMore),
    KillCursors(OpKillCursors),
    /// Any opcode the interception layer has no model for
    Unsupported { op_code: i32 },
}

impl WireMessage {
    pub fn msg(database: impl Into<String>, command: Document) -> Self {
        Self::Msg(OpMsg {
            database: database.into(),
            command,
        })
    }

    pub fn query(ns: impl Into<String>, query: Document) -> Self {
        Self::Query(OpQuery {
            ns: ns.into(),
            query,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Msg(_) => "msg",
            Self::Query(_) => "query",
            Self::GetMore(_) => "getMore",
            Self::KillCursors(_) => "killCursors",
            Self::Unsupported { .. } => "unsupported",
        }
    }

    /// Name of the command carried by a Msg or Query, if any.
    pub fn command_name(&self) -> Option<&str> {
        match self {
            Self::Msg(msg) => command_name(&msg.command),
            Self::Query(query) => command_name(&query.query),
            _ => None,
        }
    }

    /// Classifies a loosely shaped message description by the fields it carries.
    ///
    /// `cursorId` marks a GetMore, `cursorIds` a KillCursors, `command` a Msg
    /// and `query` a Query; anything else is not a protocol message.
    pub fn from_raw(raw: &Document) -> GateResult<Self> {
        let ns = raw.get_str("ns").unwrap_or_default().to_string();

        if let Some(cursor_id) = raw.get("cursorId") {
            let cursor_id = bson_to_i64(cursor_id)
                .ok_or_else(|| GateError::invalid_protocol("cursorId is not an integer"))?;
            return Ok(Self::GetMore(OpGetMore { ns, cursor_id }));
        }

        if let Ok(ids) = raw.get_array("cursorIds") {
            let cursor_ids = ids.iter().filter_map(bson_to_i64).collect();
            return Ok(Self::KillCursors(OpKillCursors { ns, cursor_ids }));
        }

        if let Ok(command) = raw.get_document("command") {
            let database = raw
                .get_str("database")
                .map(str::to_string)
                .unwrap_or_else(|_| ns.split('.').next().unwrap_or_default().to_string());
            return Ok(Self::msg(database, command.clone()));
        }

        if let Ok(query) = raw.get_document("query") {
            return Ok(Self::query(ns, query.clone()));
        }

        Err(GateError::invalid_protocol("Cannot resolve protocol type"))
    }
}

fn bson_to_i64(value: &mongodb::bson::Bson) -> Option<i64> {
    match value {
        mongodb::bson::Bson::Int64(v) => Some(*v),
        mongodb::bson::Bson::Int32(v) => Some(i64::from(*v)),
        _ => None,
    }
}
