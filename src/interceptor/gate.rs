// SPDX-License-Identifier: Apache-2.0

//! Session Pause Gate
//!
//! Per-session entry point used by the protocol layer before a command is
//! written (`pre`) and after its reply is read (`post`).

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::Document;
use parking_lot::RwLock;
use qoregate_core::{
    command_name, first_key_in, CommandOptions, GateError, GateResult, Phase, WireMessage,
};
use tracing::{debug, trace, warn};

use super::controller::CaptureController;
use super::types::GateRules;
use crate::metrics;

/// Suspension point around a command's transmission.
///
/// Both waits resolve exactly once: `Ok` with the document to continue with,
/// or an error when the command was aborted or the caller cancelled.
#[async_trait]
pub trait PauseGate: Send + Sync {
    /// Session key this gate serves, `None` for the null gate.
    fn session_id(&self) -> Option<&str>;

    async fn wait_on_protocol(
        &self,
        phase: Phase,
        message: &WireMessage,
        options: &CommandOptions,
        prior_result: Option<Document>,
    ) -> GateResult<Option<Document>>;

    async fn wait_on_command(
        &self,
        phase: Phase,
        command: &Document,
        options: &CommandOptions,
        prior_result: Option<Document>,
    ) -> GateResult<Option<Document>>;
}

/// The document a gate hands back when it lets a command through.
pub(crate) fn pass_through(
    phase: Phase,
    command: Option<&Document>,
    prior_result: Option<Document>,
) -> Option<Document> {
    metrics::record_pass();
    match (prior_result, phase) {
        (Some(result), _) => Some(result),
        (None, Phase::Pre) => command.cloned(),
        (None, Phase::Post) => None,
    }
}

/// Gate for a session that owns a server session
pub struct SessionPause {
    session_id: String,
    controller: Arc<CaptureController>,
    rules: Arc<RwLock<GateRules>>,
}

impl SessionPause {
    pub fn new(
        session_id: impl Into<String>,
        controller: Arc<CaptureController>,
        rules: Arc<RwLock<GateRules>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            controller,
            rules,
        }
    }

    fn is_allowed_command(&self, command: &Document) -> bool {
        first_key_in(command, &self.rules.read().allowed_commands)
    }

    fn is_allowed_query(&self, query: &Document) -> bool {
        first_key_in(query, &self.rules.read().allowed_queries)
    }

    async fn pause(
        &self,
        phase: Phase,
        command: &Document,
        options: &CommandOptions,
        prior_result: Option<Document>,
    ) -> GateResult<Option<Document>> {
        let pending = self
            .controller
            .pause(&self.session_id, phase, command.clone(), prior_result);
        let captured = pending.context().captured_result();
        let context_id = pending.context().id().to_string();

        match pending.wait(options.cancellation.as_ref()).await {
            Ok(resolution) => resolution.into_outcome(captured),
            Err(err) => {
                if matches!(err, GateError::OperationCancelled) {
                    debug!(
                        session_id = %self.session_id,
                        context_id = %context_id,
                        %phase,
                        "Paused command cancelled by caller"
                    );
                    metrics::record_cancel();
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl PauseGate for SessionPause {
    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    async fn wait_on_protocol(
        &self,
        phase: Phase,
        message: &WireMessage,
        options: &CommandOptions,
        prior_result: Option<Document>,
    ) -> GateResult<Option<Document>> {
        if options.bypass_interception || !self.controller.is_capturing() {
            return Ok(pass_through(phase, message_command(message), prior_result));
        }

        match message {
            WireMessage::Msg(msg) => {
                self.wait_on_command(phase, &msg.command, options, prior_result)
                    .await
            }
            WireMessage::Query(query) => {
                if self.is_allowed_query(&query.query) {
                    trace!(session_id = %self.session_id, ns = %query.ns, "Allowed legacy query");
                } else {
                    warn!(
                        session_id = %self.session_id,
                        ns = %query.ns,
                        command = command_name(&query.query).unwrap_or_default(),
                        "Legacy query passed without interception"
                    );
                }
                Ok(pass_through(phase, Some(&query.query), prior_result))
            }
            WireMessage::GetMore(_) | WireMessage::KillCursors(_) => {
                warn!(
                    session_id = %self.session_id,
                    kind = message.kind(),
                    "Cursor message passed without interception"
                );
                Ok(pass_through(phase, None, prior_result))
            }
            WireMessage::Unsupported { op_code } => Err(GateError::invalid_protocol(format!(
                "Unsupported protocol message (opCode {})",
                op_code
            ))),
        }
    }

    async fn wait_on_command(
        &self,
        phase: Phase,
        command: &Document,
        options: &CommandOptions,
        prior_result: Option<Document>,
    ) -> GateResult<Option<Document>> {
        if options.bypass_interception || !self.controller.is_capturing() {
            return Ok(pass_through(phase, Some(command), prior_result));
        }

        if self.is_allowed_command(command) {
            trace!(
                session_id = %self.session_id,
                command = command_name(command).unwrap_or_default(),
                "Allowed command"
            );
            return Ok(pass_through(phase, Some(command), prior_result));
        }

        self.pause(phase, command, options, prior_result).await
    }
}

pub(crate) fn message_command(message: &WireMessage) -> Option<&Document> {
    match message {
        WireMessage::Msg(msg) => Some(&msg.command),
        WireMessage::Query(query) => Some(&query.query),
        _ => None,
    }
}
