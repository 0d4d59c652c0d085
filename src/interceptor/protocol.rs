// SPDX-License-Identifier: Apache-2.0

//! Wire-message view of command lifecycle contexts.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::Document;
use parking_lot::Mutex;
use qoregate_core::{GateResult, WireMessage};

use super::context::{CommandContext, RunCommandContext};

/// Lifecycle hooks around a single wire message
#[async_trait]
pub trait ProtocolContext: Send + Sync {
    /// The message to write, reflecting any rewrite made while paused.
    fn protocol(&self) -> WireMessage;

    fn result(&self) -> Option<Document>;

    fn is_pass_through(&self) -> bool;

    async fn raise_pre(&self) -> GateResult<()>;

    async fn raise_post(&self, result: Option<Document>) -> GateResult<()>;

    async fn raise_exception(&self, description: String) -> GateResult<()>;

    async fn raise_complete(&self) -> GateResult<()>;
}

/// Exposes a [`RunCommandContext`] as an OP_MSG lifecycle.
pub struct RunCommandProtocolAdapter {
    database: String,
    inner: Arc<RunCommandContext>,
}

impl RunCommandProtocolAdapter {
    pub fn new(database: impl Into<String>, inner: Arc<RunCommandContext>) -> Self {
        Self {
            database: database.into(),
            inner,
        }
    }

    pub fn context(&self) -> &Arc<RunCommandContext> {
        &self.inner
    }
}

#[async_trait]
impl ProtocolContext for RunCommandProtocolAdapter {
    fn protocol(&self) -> WireMessage {
        WireMessage::msg(self.database.clone(), self.inner.command())
    }

    fn result(&self) -> Option<Document> {
        self.inner.result()
    }

    fn is_pass_through(&self) -> bool {
        false
    }

    async fn raise_pre(&self) -> GateResult<()> {
        self.inner.raise_pre().await
    }

    async fn raise_post(&self, result: Option<Document>) -> GateResult<()> {
        self.inner.raise_post(result).await
    }

    async fn raise_exception(&self, description: String) -> GateResult<()> {
        self.inner.raise_exception(description).await
    }

    async fn raise_complete(&self) -> GateResult<()> {
        self.inner.raise_complete().await
    }
}

/// Message that is written untouched.
pub struct PassThroughContext {
    message: WireMessage,
    result: Mutex<Option<Document>>,
}

impl PassThroughContext {
    pub fn new(message: WireMessage) -> Self {
        Self {
            message,
            result: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ProtocolContext for PassThroughContext {
    fn protocol(&self) -> WireMessage {
        self.message.clone()
    }

    fn result(&self) -> Option<Document> {
        self.result.lock().clone()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::controller::CaptureController;
    use mongodb::bson::doc;
    use qoregate_core::CancellationToken;

    #[tokio::test]
    async fn adapter_reflects_rewritten_command() {
        let controller = Arc::new(CaptureController::new());
        controller.start();
        let inner = Arc::new(RunCommandContext::new(
            "s1",
            doc! { "find": "orders", "filter": {} },
            Arc::clone(&controller),
            None,
        ));
        let adapter = Arc::new(RunCommandProtocolAdapter::new("shop", inner));

        let raised = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.raise_pre().await })
        };

        let token = CancellationToken::new();
        controller.wait_next_context(&token).await.expect("paused");
        let rewritten = doc! { "find": "orders", "filter": { "tenant": "a" } };
        controller.resume(Some(rewritten.clone())).expect("resume");
        assert_eq!(raised.await.expect("join"), Ok(()));

        assert_eq!(adapter.protocol(), WireMessage::msg("shop", rewritten));
    }

    #[tokio::test]
    async fn pass_through_returns_message_unchanged() {
        let message = WireMessage::query("admin.$cmd", doc! { "ismaster": 1 });
        let context = PassThroughContext::new(message.clone());

        assert_eq!(context.raise_pre().await, Ok(()));
        assert_eq!(context.raise_post(Some(doc! { "ok": 1 })).await, Ok(()));
        assert_eq!(context.protocol(), message);
        assert_eq!(context.result(), Some(doc! { "ok": 1 }));
    }
}
