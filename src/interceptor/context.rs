// SPDX-License-Identifier: Apache-2.0

//! Run-command lifecycle contexts
//!
//! A [`RunCommandContext`] walks one command through its lifecycle hooks:
//!
//! ```text
//! NONE -> PRE -> NONE -> POST -> NONE -> COMPLETE -> NONE
//!            \                \
//!             +-> EXCEPTION ---+
//! ```
//!
//! Every raise suspends the caller until the controller resumes or aborts it.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::Document;
use parking_lot::Mutex;
use qoregate_core::{CancellationToken, GateError, GateResult, RunCommandStep};
use tracing::{debug, error};
use uuid::Uuid;

use super::controller::CaptureController;
use super::types::{PauseContext, PauseKind, PendingResolution, Resolution};

/// Lifecycle hooks around a single command
#[async_trait]
pub trait CommandContext: Send + Sync {
    fn id(&self) -> &str;

    fn session_id(&self) -> Option<&str>;

    /// The command as it will be sent, including controller rewrites.
    fn command(&self) -> Document;

    /// The reply, including controller rewrites.
    fn result(&self) -> Option<Document>;

    fn step(&self) -> RunCommandStep;

    fn is_pass_through(&self) -> bool;

    async fn raise_pre(&self) -> GateResult<()>;

    async fn raise_post(&self, result: Option<Document>) -> GateResult<()>;

    async fn raise_exception(&self, description: String) -> GateResult<()>;

    async fn raise_complete(&self) -> GateResult<()>;
}

struct RunState {
    step: RunCommandStep,
    command: Document,
    result: Option<Document>,
    exception: Option<String>,
    paused: Option<Arc<PauseContext>>,
}

/// Interceptable run-command lifecycle
pub struct RunCommandContext {
    id: String,
    session_id: String,
    controller: Arc<CaptureController>,
    cancellation: Option<CancellationToken>,
    state: Mutex<RunState>,
}

impl RunCommandContext {
    pub fn new(
        session_id: impl Into<String>,
        command: Document,
        controller: Arc<CaptureController>,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            controller,
            cancellation,
            state: Mutex::new(RunState {
                step: RunCommandStep::None,
                command,
                result: None,
                exception: None,
                paused: None,
            }),
        }
    }

    pub fn exception(&self) -> Option<String> {
        self.state.lock().exception.clone()
    }

    /// The pause context currently waiting on the controller, if any.
    pub fn paused_context(&self) -> Option<Arc<PauseContext>> {
        self.state.lock().paused.clone()
    }

    fn invalid_step(&self, expected: RunCommandStep, actual: RunCommandStep) -> GateError {
        error!(
            context_id = %self.id,
            session_id = %self.session_id,
            %expected,
            %actual,
            "Invalid run-command step"
        );
        GateError::invalid_step(expected, actual)
    }

    /// Moves from NONE to `step` and builds the pause context for it.
    fn enter(
        &self,
        step: RunCommandStep,
        update: impl FnOnce(&mut RunState),
    ) -> GateResult<PendingResolution> {
        let mut state = self.state.lock();
        if state.step != RunCommandStep::None {
            return Err(self.invalid_step(RunCommandStep::None, state.step));
        }

        update(&mut state);
        state.step = step;

        let (context, pending) = match step {
            RunCommandStep::Exception => PauseContext::for_exception(
                self.session_id.clone(),
                state.command.clone(),
                state.exception.clone().unwrap_or_default(),
            ),
            _ => PauseContext::new(
                self.session_id.clone(),
                PauseKind::Step(step),
                state.command.clone(),
                state.result.clone(),
            ),
        };
        state.paused = Some(context);
        Ok(pending)
    }

    async fn raise(
        &self,
        step: RunCommandStep,
        update: impl FnOnce(&mut RunState) + Send,
    ) -> GateResult<()> {
        let pending = self.enter(step, update)?;
        debug!(context_id = %self.id, session_id = %self.session_id, %step, "Raise");

        self.controller.enqueue(Arc::clone(pending.context()));
        let outcome = pending.wait(self.cancellation.as_ref()).await;

        let mut state = self.state.lock();
        state.paused = None;
        state.step = RunCommandStep::None;
        match outcome {
            Ok(Resolution::Resumed(updated)) => {
                Self::apply(&mut state, step, updated);
                Ok(())
            }
            Ok(Resolution::Aborted(reason)) => Err(GateError::aborted(reason)),
            Err(err) => Err(err),
        }
    }

    fn apply(state: &mut RunState, step: RunCommandStep, updated: Option<Document>) {
        let Some(updated) = updated else {
            return;
        };
        match step {
            RunCommandStep::Pre => state.command = updated,
            RunCommandStep::Post => state.result = Some(updated),
            _ => {}
        }
    }

    /// Resumes the waiter of `expected`, optionally replacing the captured document.
    fn resume_step(&self, expected: RunCommandStep, updated: Option<Document>) -> GateResult<()> {
        let paused = {
            let mut state = self.state.lock();
            if state.step != expected {
                return Err(self.invalid_step(expected, state.step));
            }
            Self::apply(&mut state, expected, updated.clone());
            state.step = RunCommandStep::None;
            state.paused.take()
        };

        if let Some(context) = paused {
            self.controller.resume_context(&context, updated);
        }
        Ok(())
    }

    pub fn resume_pre(&self) -> GateResult<()> {
        self.resume_step(RunCommandStep::Pre, None)
    }

    pub fn resume_post(&self, updated: Option<Document>) -> GateResult<()> {
        self.resume_step(RunCommandStep::Post, updated)
    }

    pub fn resume_exception(&self) -> GateResult<()> {
        self.resume_step(RunCommandStep::Exception, None)
    }

    pub fn resume_complete(&self) -> GateResult<()> {
        self.resume_step(RunCommandStep::Complete, None)
    }

    /// Fails the waiting raise, whatever step it is in.
    ///
    /// Returns false when nothing was waiting.
    pub fn abort(&self, reason: &str) -> bool {
        let paused = self.state.lock().paused.take();
        match paused {
            Some(context) => self.controller.abort_context(&context, reason),
            None => false,
        }
    }
}

#[async_trait]
impl CommandContext for RunCommandContext {
    fn id(&self) -> &str {
        &self.id
    }

    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn command(&self) -> Document {
        self.state.lock().command.clone()
    }

    fn result(&self) -> Option<Document> {
        self.state.lock().result.clone()
    }

    fn step(&self) -> RunCommandStep {
        self.state.lock().step
    }

    fn is_pass_through(&self) -> bool {
        false
    }

    async fn raise_pre(&self) -> GateResult<()> {
        self.raise(RunCommandStep::Pre, |_| {}).await
    }

    async fn raise_post(&self, result: Option<Document>) -> GateResult<()> {
        self.raise(RunCommandStep::Post, move |state| {
            if result.is_some() {
                state.result = result;
            }
        })
        .await
    }

    async fn raise_exception(&self, description: String) -> GateResult<()> {
        self.raise(RunCommandStep::Exception, move |state| {
            state.exception = Some(description);
        })
        .await
    }

    async fn raise_complete(&self) -> GateResult<()> {
        self.raise(RunCommandStep::Complete, |_| {}).await
    }
}

/// Context for commands that are not intercepted; every raise returns at once.
pub struct PassThroughCommandContext {
    id: String,
    session_id: Option<String>,
    command: Document,
    result: Mutex<Option<Document>>,
}

impl PassThroughCommandContext {
    pub fn new(session_id: Option<String>, command: Document) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            command,
            result: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CommandContext for PassThroughCommandContext {
    fn id(&self) -> &str {
        &self.id
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn command(&self) -> Document {
        self.command.clone()
    }

    fn result(&self) -> Option<Document> {
        self.result.lock().clone()
    }

    fn step(&self) -> RunCommandStep {
        RunCommandStep::None
    }

    fn is_pass_through(&self) -> bool {
        true
    }

    async fn raise_pre(&self) -> GateResult<()> {
        Ok(())
    }

    async fn raise_post(&self, result: Option<Document>) -> GateResult<()> {
        if result.is_some() {
            *self.result.lock() = result;
        }
        Ok(())
    }

    async fn raise_exception(&self, _description: String) -> GateResult<()> {
        Ok(())
    }

    async fn raise_complete(&self) -> GateResult<()> {
        Ok(())
    }
}
