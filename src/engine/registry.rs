//! Session Pause Registry
//!
//! Hands each client session its own cached pause gate. Commands with no
//! resolvable session share a single null gate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use qoregate_core::{resolve_session_id, SessionIdentity};
use tracing::debug;

use crate::interceptor::controller::CaptureController;
use crate::interceptor::gate::{PauseGate, SessionPause};
use crate::interceptor::null_gate::NullSessionPause;
use crate::interceptor::types::GateRules;

/// Registry of per-session pause gates
pub struct SessionPauseRegistry {
    controller: Arc<CaptureController>,
    rules: Arc<RwLock<GateRules>>,
    null_gate: Arc<NullSessionPause>,
    gates: RwLock<HashMap<String, Arc<SessionPause>>>,
}

impl SessionPauseRegistry {
    pub fn new(controller: Arc<CaptureController>, rules: Arc<RwLock<GateRules>>) -> Self {
        Self {
            null_gate: Arc::new(NullSessionPause::new(
                Arc::clone(&controller),
                Arc::clone(&rules),
            )),
            controller,
            rules,
            gates: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the gate for the identity's session, creating it on first use.
    ///
    /// Falls back to the shared null gate when no session id resolves.
    pub fn create_or_get(&self, identity: Option<&SessionIdentity>) -> Arc<dyn PauseGate> {
        let Some(session_id) = resolve_session_id(identity) else {
            return self.null_gate.clone();
        };

        if let Some(gate) = self.gates.read().get(&session_id) {
            return gate.clone();
        }

        let mut gates = self.gates.write();
        let gate = gates.entry(session_id.clone()).or_insert_with(|| {
            debug!(session_id = %session_id, "Session pause gate created");
            Arc::new(SessionPause::new(
                session_id.clone(),
                Arc::clone(&self.controller),
                Arc::clone(&self.rules),
            ))
        });
        gate.clone()
    }

    /// Drops the gate of a session that has ended.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.gates.write().remove(session_id).is_some();
        if removed {
            debug!(session_id, "Session pause gate removed");
        }
        removed
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.gates.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.gates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.read().is_empty()
    }
}
