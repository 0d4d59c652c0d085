//! Command Interceptor
//!
//! Pause/resume interception for MongoDB wire traffic:
//! - **Gates**: per-session suspension points around each command
//! - **Filters**: skip/reject decisions before a command is paused
//! - **Contexts**: the run-command lifecycle (pre, post, exception, complete)
//! - **Controller**: the FIFO queue an external controller drains
//!
//! Every paused command is settled exactly once: resumed, aborted, or
//! withdrawn by its caller.

pub mod context;
pub mod controller;
pub mod factory;
pub mod filters;
pub mod gate;
pub mod null_gate;
pub mod pipeline;
pub mod protocol;
pub mod types;

pub use context::{CommandContext, PassThroughCommandContext, RunCommandContext};
pub use controller::CaptureController;
pub use factory::ContextFactory;
pub use filters::{CommandFilter, CommandNameFilter, FilterChain, FilterVerdict, SkipMarkerFilter};
pub use gate::{PauseGate, SessionPause};
pub use null_gate::NullSessionPause;
pub use pipeline::InterceptorPipeline;
pub use protocol::{PassThroughContext, ProtocolContext, RunCommandProtocolAdapter};
pub use types::*;
