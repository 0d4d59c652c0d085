// SPDX-License-Identifier: Apache-2.0

//! Interceptor Pipeline
//!
//! Wires the interception engine together:
//! 1. Producers: session gates and run-command contexts per command
//! 2. Consumer: activate, inspect, resume or abort through the controller
//! 3. Configuration: allow/skip/reject sets, persisted as `interceptor.json`

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use mongodb::bson::Document;
use parking_lot::RwLock;
use qoregate_core::{CommandOptions, GateError, GateResult, SessionIdentity, WireMessage};
use tracing::{debug, info};

use super::context::CommandContext;
use super::controller::CaptureController;
use super::factory::ContextFactory;
use super::filters::FilterChain;
use super::gate::PauseGate;
use super::protocol::ProtocolContext;
use super::types::{GateRules, InterceptorConfig};
use crate::engine::SessionPauseRegistry;
use crate::metrics::{self, InterceptionMetricsSnapshot};

const CONFIG_FILE: &str = "interceptor.json";

static GLOBAL_PIPELINE: OnceLock<InterceptorPipeline> = OnceLock::new();

/// The main interceptor pipeline
pub struct InterceptorPipeline {
    controller: Arc<CaptureController>,
    /// Allow sets shared with every session gate
    rules: Arc<RwLock<GateRules>>,
    /// Filter chain shared with the context factory
    filters: Arc<RwLock<FilterChain>>,
    registry: SessionPauseRegistry,
    factory: ContextFactory,
    config: RwLock<InterceptorConfig>,
    /// Data directory for persistence; `None` keeps configuration in memory
    data_dir: Option<PathBuf>,
}

impl InterceptorPipeline {
    /// Creates a new interceptor pipeline
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Self::with_controller(Arc::new(CaptureController::new()), data_dir)
    }

    /// Creates a pipeline around an existing controller.
    pub fn with_controller(controller: Arc<CaptureController>, data_dir: Option<PathBuf>) -> Self {
        let config = InterceptorConfig::default();
        let rules = Arc::new(RwLock::new(GateRules::from_config(&config)));
        let filters = Arc::new(RwLock::new(FilterChain::standard(&config)));

        let registry = SessionPauseRegistry::new(Arc::clone(&controller), Arc::clone(&rules));
        let factory = ContextFactory::new(Arc::clone(&controller), Arc::clone(&filters));

        info!("Interceptor pipeline initialized");

        Self {
            controller,
            rules,
            filters,
            registry,
            factory,
            config: RwLock::new(config),
            data_dir,
        }
    }

    /// Process-wide pipeline, created on first use without persistence.
    pub fn global() -> &'static InterceptorPipeline {
        GLOBAL_PIPELINE.get_or_init(|| Self::new(None))
    }

    // ==================== Configuration ====================

    /// Load configuration from file
    pub fn load_config(&self) -> GateResult<()> {
        let Some(config_path) = self.data_dir.as_ref().map(|dir| dir.join(CONFIG_FILE)) else {
            return Ok(());
        };

        if !config_path.exists() {
            debug!("No interceptor config file found, using defaults");
            return Ok(());
        }

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| GateError::config(format!("Failed to read config: {}", e)))?;

        let config: InterceptorConfig = serde_json::from_str(&content)
            .map_err(|e| GateError::config(format!("Failed to parse config: {}", e)))?;

        self.apply_config(config);

        info!("Loaded interceptor configuration from {:?}", config_path);
        Ok(())
    }

    /// Save configuration to file
    pub fn save_config(&self) -> GateResult<()> {
        let Some(data_dir) = self.data_dir.as_ref() else {
            return Ok(());
        };

        std::fs::create_dir_all(data_dir)
            .map_err(|e| GateError::config(format!("Failed to create data dir: {}", e)))?;
        let config_path = data_dir.join(CONFIG_FILE);

        let config = self.config.read().clone();
        let content = serde_json::to_string_pretty(&config)
            .map_err(|e| GateError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&config_path, content)
            .map_err(|e| GateError::config(format!("Failed to write config: {}", e)))?;

        debug!("Saved interceptor configuration to {:?}", config_path);
        Ok(())
    }

    /// Swaps rules, filters and config under all three write locks.
    ///
    /// Concurrent updates apply one after another, never interleaved. A gate
    /// or factory decision already in progress finishes with the previous set.
    fn apply_config(&self, config: InterceptorConfig) {
        let rules = GateRules::from_config(&config);
        let filters = FilterChain::standard(&config);

        let mut current = self.config.write();
        let mut rules_guard = self.rules.write();
        let mut filters_guard = self.filters.write();
        *rules_guard = rules;
        *filters_guard = filters;
        *current = config;
    }

    pub fn get_config(&self) -> InterceptorConfig {
        self.config.read().clone()
    }

    /// Applies a configuration to every gate and filter, then persists it.
    pub fn update_config(&self, config: InterceptorConfig) -> GateResult<()> {
        self.apply_config(config);
        self.save_config()
    }

    // ==================== Producers ====================

    pub fn gate_for(&self, identity: Option<&SessionIdentity>) -> Arc<dyn PauseGate> {
        self.registry.create_or_get(identity)
    }

    /// Forgets the gate of a session that has ended.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.registry.remove(session_id)
    }

    pub fn command_context(
        &self,
        identity: Option<&SessionIdentity>,
        command: Document,
        options: &CommandOptions,
    ) -> GateResult<Arc<dyn CommandContext>> {
        self.factory.create_for_command(identity, command, options)
    }

    pub fn protocol_context(
        &self,
        identity: Option<&SessionIdentity>,
        message: WireMessage,
        options: &CommandOptions,
    ) -> GateResult<Arc<dyn ProtocolContext>> {
        self.factory.create_for_protocol(identity, message, options)
    }

    // ==================== Consumer ====================

    pub fn controller(&self) -> &Arc<CaptureController> {
        &self.controller
    }

    pub fn registry(&self) -> &SessionPauseRegistry {
        &self.registry
    }

    pub fn activate(&self) {
        self.controller.activate();
    }

    /// Aborts everything still paused. Returns the number of aborted contexts.
    pub fn deactivate(&self) -> usize {
        self.controller.deactivate()
    }

    pub fn metrics(&self) -> InterceptionMetricsSnapshot {
        metrics::snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::filters::FilterVerdict;
    use mongodb::bson::doc;
    use qoregate_core::Phase;
    use tempfile::tempdir;

    #[test]
    fn config_persists_across_pipelines() {
        let dir = tempdir().expect("tempdir");
        let pipeline = InterceptorPipeline::new(Some(dir.path().to_path_buf()));
        pipeline.load_config().expect("load defaults");
        assert_eq!(pipeline.get_config(), InterceptorConfig::default());

        let config = InterceptorConfig {
            reject_commands: vec!["dropDatabase".into()],
            ..InterceptorConfig::default()
        };
        pipeline.update_config(config.clone()).expect("update");
        assert!(dir.path().join(CONFIG_FILE).exists());

        let reloaded = InterceptorPipeline::new(Some(dir.path().to_path_buf()));
        reloaded.load_config().expect("load");
        assert_eq!(reloaded.get_config(), config);
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").expect("write");

        let pipeline = InterceptorPipeline::new(Some(dir.path().to_path_buf()));
        assert!(matches!(pipeline.load_config(), Err(GateError::Config { .. })));
    }

    #[test]
    fn update_applies_to_live_filters() {
        let pipeline = InterceptorPipeline::new(None);
        pipeline.activate();
        let identity = SessionIdentity::from("s1");

        let context = pipeline
            .command_context(Some(&identity), doc! { "count": "orders" }, &CommandOptions::default())
            .expect("context");
        assert!(!context.is_pass_through());

        pipeline
            .update_config(InterceptorConfig {
                skip_commands: vec!["count".into()],
                ..InterceptorConfig::default()
            })
            .expect("update");

        let context = pipeline
            .command_context(Some(&identity), doc! { "count": "orders" }, &CommandOptions::default())
            .expect("context");
        assert!(context.is_pass_through());
    }

    #[tokio::test]
    async fn update_applies_to_live_gates() {
        let pipeline = InterceptorPipeline::new(None);
        pipeline.activate();
        let gate = pipeline.gate_for(Some(&SessionIdentity::from("s1")));

        pipeline
            .update_config(InterceptorConfig {
                allowed_commands: vec!["listCollections".into()],
                ..InterceptorConfig::default()
            })
            .expect("update");

        let command = doc! { "listCollections": 1 };
        let result = gate
            .wait_on_command(Phase::Pre, &command, &CommandOptions::default(), None)
            .await;
        assert_eq!(result, Ok(Some(command)));
        assert_eq!(pipeline.controller().queue_len(), 0);
    }

    #[test]
    fn concurrent_updates_never_mix_configs() {
        let pipeline = Arc::new(InterceptorPipeline::new(None));
        let variant = |name: &str| InterceptorConfig {
            skip_commands: vec![name.to_string()],
            allowed_commands: vec![name.to_string()],
            ..InterceptorConfig::default()
        };

        for _ in 0..200 {
            let writers: Vec<_> = ["alpha", "beta"]
                .into_iter()
                .map(|name| {
                    let pipeline = Arc::clone(&pipeline);
                    let config = variant(name);
                    std::thread::spawn(move || pipeline.apply_config(config))
                })
                .collect();
            for writer in writers {
                writer.join().expect("writer");
            }

            let config = pipeline.get_config();
            let name = config.skip_commands[0].clone();
            let mut command = Document::new();
            command.insert(name.as_str(), 1);

            assert!(pipeline.rules.read().allowed_commands.contains(&name));
            assert_eq!(pipeline.rules.read().allowed_commands.len(), 1);
            assert_eq!(
                pipeline.filters.read().evaluate(&command, &CommandOptions::default()),
                Ok(FilterVerdict::Skip)
            );
        }
    }

    #[test]
    fn global_pipeline_is_shared() {
        let first = InterceptorPipeline::global();
        let second = InterceptorPipeline::global();
        assert!(std::ptr::eq(first, second));
    }
}
