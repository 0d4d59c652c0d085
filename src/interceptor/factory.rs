// SPDX-License-Identifier: Apache-2.0

//! Context Factory
//!
//! Chooses, per command, between a pass-through context and an
//! interceptable run-command context.

use std::sync::Arc;

use mongodb::bson::Document;
use parking_lot::RwLock;
use qoregate_core::{
    command_name, resolve_session_id, CommandOptions, GateError, GateResult, SessionIdentity,
    WireMessage,
};
use tracing::{debug, trace};

use super::context::{CommandContext, PassThroughCommandContext, RunCommandContext};
use super::controller::CaptureController;
use super::filters::{FilterChain, FilterVerdict};
use super::protocol::{PassThroughContext, ProtocolContext, RunCommandProtocolAdapter};

pub struct ContextFactory {
    controller: Arc<CaptureController>,
    filters: Arc<RwLock<FilterChain>>,
}

impl ContextFactory {
    pub fn new(controller: Arc<CaptureController>, filters: Arc<RwLock<FilterChain>>) -> Self {
        Self {
            controller,
            filters,
        }
    }

    /// Returns the session key when the command should get a run-command context.
    fn intercepted_session(
        &self,
        session_id: Option<String>,
        command: &Document,
        options: &CommandOptions,
    ) -> GateResult<Option<String>> {
        if !self.controller.is_capturing() || options.bypass_interception {
            return Ok(None);
        }
        let Some(session_id) = session_id else {
            trace!(
                command = command_name(command).unwrap_or_default(),
                "No session, command not intercepted"
            );
            return Ok(None);
        };

        match self.filters.read().evaluate(command, options)? {
            FilterVerdict::Skip => Ok(None),
            FilterVerdict::Pause => Ok(Some(session_id)),
        }
    }

    fn run_command(
        &self,
        session_id: String,
        command: Document,
        options: &CommandOptions,
    ) -> Arc<RunCommandContext> {
        let context = RunCommandContext::new(
            session_id,
            command,
            Arc::clone(&self.controller),
            options.cancellation.clone(),
        );
        debug!(
            context_id = %context.id(),
            session_id = context.session_id().unwrap_or_default(),
            command = command_name(&context.command()).unwrap_or_default(),
            "Run-command context created"
        );
        Arc::new(context)
    }

    pub fn create_for_command(
        &self,
        identity: Option<&SessionIdentity>,
        command: Document,
        options: &CommandOptions,
    ) -> GateResult<Arc<dyn CommandContext>> {
        let session_id = resolve_session_id(identity);

        match self.intercepted_session(session_id.clone(), &command, options)? {
            Some(session_id) => Ok(self.run_command(session_id, command, options)),
            None => Ok(Arc::new(PassThroughCommandContext::new(session_id, command))),
        }
    }

    pub fn create_for_protocol(
        &self,
        identity: Option<&SessionIdentity>,
        message: WireMessage,
        options: &CommandOptions,
    ) -> GateResult<Arc<dyn ProtocolContext>> {
        let session_id = resolve_session_id(identity);
        if !self.controller.is_capturing() || options.bypass_interception || session_id.is_none() {
            return Ok(Arc::new(PassThroughContext::new(message)));
        }

        let msg = match message {
            WireMessage::Msg(msg) => msg,
            WireMessage::Unsupported { op_code } => {
                return Err(GateError::invalid_protocol(format!(
                    "Unsupported protocol message (opCode {})",
                    op_code
                )))
            }
            other => return Ok(Arc::new(PassThroughContext::new(other))),
        };

        match self.intercepted_session(session_id, &msg.command, options)? {
            Some(session_id) => {
                let inner = self.run_command(session_id, msg.command, options);
                Ok(Arc::new(RunCommandProtocolAdapter::new(msg.database, inner)))
            }
            None => Ok(Arc::new(PassThroughContext::new(WireMessage::Msg(msg)))),
        }
    }
}
