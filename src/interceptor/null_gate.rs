// SPDX-License-Identifier: Apache-2.0

//! Gate used when a command has no resolvable session. It never pauses.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::Document;
use parking_lot::RwLock;
use qoregate_core::{
    command_name, first_key_in, CommandOptions, GateError, GateResult, Phase, WireMessage,
};
use tracing::{trace, warn};

use super::controller::CaptureController;
use super::gate::{message_command, pass_through, PauseGate};
use super::types::GateRules;

pub struct NullSessionPause {
    controller: Arc<CaptureController>,
    rules: Arc<RwLock<GateRules>>,
}

impl NullSessionPause {
    pub fn new(controller: Arc<CaptureController>, rules: Arc<RwLock<GateRules>>) -> Self {
        Self { controller, rules }
    }
}

#[async_trait]
impl PauseGate for NullSessionPause {
    fn session_id(&self) -> Option<&str> {
        None
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
            WireMessage::Unsupported { op_code } => Err(GateError::invalid_protocol(format!(
                "Unsupported protocol message (opCode {})",
                op_code
            ))),
            _ => Ok(pass_through(phase, message_command(message), prior_result)),
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

        let name = command_name(command).unwrap_or_default();
        if first_key_in(command, &self.rules.read().null_allowed_commands) {
            trace!(command = name, %phase, "Sessionless command allowed");
        } else {
            warn!(command = name, %phase, "Command issued without a session, not intercepted");
        }

        Ok(pass_through(phase, Some(command), prior_result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::types::InterceptorConfig;
    use mongodb::bson::doc;
    use qoregate_core::OpKillCursors;

    fn gate() -> (Arc<CaptureController>, NullSessionPause) {
        let controller = Arc::new(CaptureController::new());
        let rules = Arc::new(RwLock::new(GateRules::from_config(
            &InterceptorConfig::default(),
        )));
        (Arc::clone(&controller), NullSessionPause::new(controller, rules))
    }

    #[tokio::test]
    async fn never_pauses() {
        let (controller, gate) = gate();
        controller.start();

        let command = doc! { "dropDatabase": 1 };
        let result = gate
            .wait_on_command(Phase::Pre, &command, &CommandOptions::default(), None)
            .await;
        assert_eq!(result, Ok(Some(command)));

        let reply = doc! { "ok": 1 };
        let result = gate
            .wait_on_protocol(
                Phase::Post,
                &WireMessage::KillCursors(OpKillCursors {
                    ns: "shop.orders".into(),
                    cursor_ids: vec![1, 2],
                }),
                &CommandOptions::default(),
                Some(reply.clone()),
            )
            .await;
        assert_eq!(result, Ok(Some(reply)));
        assert_eq!(controller.queue_len(), 0);
    }

    #[tokio::test]
    async fn rejects_unsupported_messages_while_capturing() {
        let (controller, gate) = gate();
        controller.start();

        let result = gate
            .wait_on_protocol(
                Phase::Pre,
                &WireMessage::Unsupported { op_code: 1 },
                &CommandOptions::default(),
                None,
            )
            .await;
        assert!(matches!(result, Err(GateError::InvalidProtocol { .. })));
    }

    #[tokio::test]
    async fn bypass_or_inactive_capture_passes_any_message() {
        let (controller, gate) = gate();
        let message = WireMessage::Unsupported { op_code: 2013 };

        for options in [CommandOptions::default(), CommandOptions::no_pause()] {
            let result = gate.wait_on_protocol(Phase::Pre, &message, &options, None).await;
            assert_eq!(result, Ok(None));
        }

        controller.start();
        let result = gate
            .wait_on_protocol(Phase::Pre, &message, &CommandOptions::no_pause(), None)
            .await;
        assert_eq!(result, Ok(None));
    }
}
