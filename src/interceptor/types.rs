// SPDX-License-Identifier: Apache-2.0

//! Interceptor Types
//!
//! Configuration, paused-command contexts, and their resolution.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use parking_lot::Mutex;
use qoregate_core::{CancellationToken, GateError, GateResult, Phase, RunCommandStep};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Configuration for the interceptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptorConfig {
    /// Commands the filter chain always skips
    #[serde(default = "default_skip_commands")]
    pub skip_commands: Vec<String>,
    /// Commands the filter chain refuses outright
    #[serde(default)]
    pub reject_commands: Vec<String>,
    /// Msg commands a session gate lets through without pausing
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    /// Legacy query commands a session gate lets through quietly
    #[serde(default = "default_allowed_queries")]
    pub allowed_queries: Vec<String>,
    /// Commands the null gate lets through without a warning
    #[serde(default = "default_allowed_commands")]
    pub null_allowed_commands: Vec<String>,
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn default_skip_commands() -> Vec<String> {
    to_strings(&["authenticate", "getnonce", "buildInfo", "_isSelf", "netstat", "ping"])
}

/// Auth handshake steps, topology checks, and legacy copydb opcodes.
fn default_allowed_commands() -> Vec<String> {
    to_strings(&[
        "saslStart",
        "authenticate",
        "saslContinue",
        "getnonce",
        "createUser",
        "updateUser",
        "copydbgetnonce",
        "copydbsaslstart",
        "copydb",
        "ismaster",
        "ping",
        "hello",
    ])
}

fn default_allowed_queries() -> Vec<String> {
    to_strings(&["ismaster"])
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            skip_commands: default_skip_commands(),
            reject_commands: Vec::new(),
            allowed_commands: default_allowed_commands(),
            allowed_queries: default_allowed_queries(),
            null_allowed_commands: default_allowed_commands(),
        }
    }
}

/// Allow sets consulted by the session gates
#[derive(Debug, Clone, Default)]
pub struct GateRules {
    pub allowed_commands: HashSet<String>,
    pub allowed_queries: HashSet<String>,
    pub null_allowed_commands: HashSet<String>,
}

impl GateRules {
    pub fn from_config(config: &InterceptorConfig) -> Self {
        Self {
            allowed_commands: config.allowed_commands.iter().cloned().collect(),
            allowed_queries: config.allowed_queries.iter().cloned().collect(),
            null_allowed_commands: config.null_allowed_commands.iter().cloned().collect(),
        }
    }
}

/// What raised a pause: a session gate phase or a run-command step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PauseKind {
    Phase(Phase),
    Step(RunCommandStep),
}

impl PauseKind {
    /// The wire phase this pause corresponds to, if it has one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase(phase) => Some(*phase),
            Self::Step(RunCommandStep::Pre) => Some(Phase::Pre),
            Self::Step(RunCommandStep::Post) => Some(Phase::Post),
            Self::Step(_) => None,
        }
    }
}

impl fmt::Display for PauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase(phase) => write!(f, "{}", phase),
            Self::Step(step) => write!(f, "{}", step),
        }
    }
}

/// How a paused command was settled
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Continue, optionally replacing the captured document
    Resumed(Option<Document>),
    /// Fail the command with the given reason
    Aborted(String),
}

impl Resolution {
    /// Converts the resolution into the outcome a producer sees.
    pub fn into_outcome(self, captured: Option<Document>) -> GateResult<Option<Document>> {
        match self {
            Self::Resumed(Some(updated)) => Ok(Some(updated)),
            Self::Resumed(None) => Ok(captured),
            Self::Aborted(reason) => Err(GateError::aborted(reason)),
        }
    }
}

/// A command suspended while waiting for the controller
pub struct PauseContext {
    id: String,
    session_id: String,
    kind: PauseKind,
    command: Document,
    prior_result: Option<Document>,
    exception: Option<String>,
    created_at: DateTime<Utc>,
    resolver: Mutex<Option<oneshot::Sender<Resolution>>>,
}

impl PauseContext {
    /// Creates a context and the handle its producer waits on.
    pub fn new(
        session_id: impl Into<String>,
        kind: PauseKind,
        command: Document,
        prior_result: Option<Document>,
    ) -> (Arc<Self>, PendingResolution) {
        Self::build(session_id.into(), kind, command, prior_result, None)
    }

    /// Creates a context describing a failed command.
    pub fn for_exception(
        session_id: impl Into<String>,
        command: Document,
        exception: String,
    ) -> (Arc<Self>, PendingResolution) {
        Self::build(
            session_id.into(),
            PauseKind::Step(RunCommandStep::Exception),
            command,
            None,
            Some(exception),
        )
    }

    fn build(
        session_id: String,
        kind: PauseKind,
        command: Document,
        prior_result: Option<Document>,
        exception: Option<String>,
    ) -> (Arc<Self>, PendingResolution) {
        let (tx, rx) = oneshot::channel();
        let context = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            kind,
            command,
            prior_result,
            exception,
            created_at: Utc::now(),
            resolver: Mutex::new(Some(tx)),
        });

        let pending = PendingResolution {
            context: Arc::clone(&context),
            rx,
        };
        (context, pending)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn kind(&self) -> PauseKind {
        self.kind
    }

    pub fn command(&self) -> &Document {
        &self.command
    }

    pub fn prior_result(&self) -> Option<&Document> {
        self.prior_result.as_ref()
    }

    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The document handed back on a resume without an update: the prior
    /// result when there is one, otherwise the command for a `pre` pause.
    pub fn captured_result(&self) -> Option<Document> {
        match (&self.prior_result, self.kind.phase()) {
            (Some(result), _) => Some(result.clone()),
            (None, Some(Phase::Pre)) => Some(self.command.clone()),
            (None, _) => None,
        }
    }

    /// Resumes the producer. Returns false if the context was already settled.
    pub fn resume(&self, updated: Option<Document>) -> bool {
        self.settle(Resolution::Resumed(updated))
    }

    /// Aborts the producer. Returns false if the context was already settled.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        self.settle(Resolution::Aborted(reason.into()))
    }

    pub fn is_settled(&self) -> bool {
        self.resolver.lock().is_none()
    }

    fn settle(&self, resolution: Resolution) -> bool {
        let Some(tx) = self.resolver.lock().take() else {
            return false;
        };
        // The producer may have stopped waiting; the context still counts as settled.
        let _ = tx.send(resolution);
        true
    }

    /// Withdraws the context on behalf of a producer that stopped waiting.
    fn withdraw(&self) -> bool {
        self.resolver.lock().take().is_some()
    }
}

impl fmt::Debug for PauseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseContext")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("kind", &self.kind)
            .field("command", &self.command)
            .field("prior_result", &self.prior_result)
            .field("exception", &self.exception)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Producer side of a paused command
pub struct PendingResolution {
    context: Arc<PauseContext>,
    rx: oneshot::Receiver<Resolution>,
}

impl PendingResolution {
    pub fn context(&self) -> &Arc<PauseContext> {
        &self.context
    }

    /// Waits until the controller settles the context.
    ///
    /// If `cancellation` fires first the context is withdrawn, so a later
    /// resume or abort from the controller has no effect.
    pub async fn wait(mut self, cancellation: Option<&CancellationToken>) -> GateResult<Resolution> {
        let Some(token) = cancellation else {
            return (&mut self.rx)
                .await
                .map_err(|_| GateError::OperationCancelled);
        };

        tokio::select! {
            biased;
            resolution = &mut self.rx => resolution.map_err(|_| GateError::OperationCancelled),
            _ = token.cancelled() => {
                if self.context.withdraw() {
                    return Err(GateError::OperationCancelled);
                }
                // Settled concurrently with the cancellation: that resolution wins.
                self.rx.try_recv().map_err(|_| GateError::OperationCancelled)
            }
        }
    }
}
