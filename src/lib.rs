// QoreGate - pause/resume interception for MongoDB wire clients
// Core library

pub mod engine;
pub mod interceptor;
pub mod metrics;
pub mod observability;

pub use engine::SessionPauseRegistry;
pub use interceptor::{
    CaptureController, CommandContext, ContextFactory, InterceptorConfig, InterceptorPipeline,
    PauseContext, PauseGate, PauseKind, PendingResolution, ProtocolContext, Resolution,
};
pub use qoregate_core::{
    resolve_session_id, CancellationToken, ClientSessionHandle, CommandOptions, GateError,
    GateResult, Phase, RunCommandStep, ServerSessionId, SessionIdentity, WireMessage,
};
