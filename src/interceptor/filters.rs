// SPDX-License-Identifier: Apache-2.0

//! Command Filter Chain
//!
//! Decides, before a run-command context is created, whether a command is
//! skipped, rejected, or paused.

use std::collections::HashSet;

use mongodb::bson::Document;
use qoregate_core::{command_name, CommandOptions, GateError, GateResult};
use tracing::{debug, warn};

use super::types::InterceptorConfig;
use crate::metrics;

/// A single skip/reject rule
pub trait CommandFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_skip(&self, command: &Document, options: &CommandOptions) -> bool;

    fn is_reject(&self, _command: &Document, _options: &CommandOptions) -> bool {
        false
    }

    fn throw_if_reject(&self, command: &Document, options: &CommandOptions) -> GateResult<()> {
        if self.is_reject(command, options) {
            return Err(GateError::policy_rejected(
                command_name(command).unwrap_or_default(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Skip,
    Pause,
}

/// Skips commands whose options carry the force-skip marker.
pub struct SkipMarkerFilter;

impl CommandFilter for SkipMarkerFilter {
    fn name(&self) -> &'static str {
        "skip-marker"
    }

    fn is_skip(&self, _command: &Document, options: &CommandOptions) -> bool {
        options.skip_interception
    }
}

/// Skips or rejects commands by name.
pub struct CommandNameFilter {
    skip: HashSet<String>,
    reject: HashSet<String>,
}

impl CommandNameFilter {
    pub fn new<S, R>(skip: S, reject: R) -> Self
    where
        S: IntoIterator<Item = String>,
        R: IntoIterator<Item = String>,
    {
        Self {
            skip: skip.into_iter().collect(),
            reject: reject.into_iter().collect(),
        }
    }

    pub fn from_config(config: &InterceptorConfig) -> Self {
        Self::new(
            config.skip_commands.iter().cloned(),
            config.reject_commands.iter().cloned(),
        )
    }

    fn matches(set: &HashSet<String>, command: &Document) -> bool {
        command_name(command).is_some_and(|name| set.contains(name))
    }
}

impl CommandFilter for CommandNameFilter {
    fn name(&self) -> &'static str {
        "command-name"
    }

    fn is_skip(&self, command: &Document, _options: &CommandOptions) -> bool {
        Self::matches(&self.skip, command)
    }

    fn is_reject(&self, command: &Document, _options: &CommandOptions) -> bool {
        Self::matches(&self.reject, command)
    }
}

/// Ordered filters; the first skip wins and any reject fails the command.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn CommandFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The marker filter followed by the configured name filter.
    pub fn standard(config: &InterceptorConfig) -> Self {
        Self::new()
            .with(SkipMarkerFilter)
            .with(CommandNameFilter::from_config(config))
    }

    pub fn with(mut self, filter: impl CommandFilter + 'static) -> Self {
        self.push(filter);
        self
    }

    pub fn push(&mut self, filter: impl CommandFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn evaluate(&self, command: &Document, options: &CommandOptions) -> GateResult<FilterVerdict> {
        let name = command_name(command).unwrap_or_default();

        for filter in &self.filters {
            if filter.is_skip(command, options) {
                debug!(filter = filter.name(), command = name, "Command skipped");
                metrics::record_skip();
                return Ok(FilterVerdict::Skip);
            }

            if let Err(err) = filter.throw_if_reject(command, options) {
                warn!(filter = filter.name(), command = name, "Command rejected");
                metrics::record_reject();
                return Err(err);
            }
        }

        Ok(FilterVerdict::Pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn default_skip_set() {
        let chain = FilterChain::standard(&InterceptorConfig::default());
        let options = CommandOptions::default();

        for name in ["authenticate", "getnonce", "buildInfo", "_isSelf", "netstat", "ping"] {
            let mut command = Document::new();
            command.insert(name, 1);
            assert_eq!(chain.evaluate(&command, &options), Ok(FilterVerdict::Skip), "{name}");
        }
        assert_eq!(
            chain.evaluate(&doc! { "insert": "orders" }, &options),
            Ok(FilterVerdict::Pause)
        );
    }

    #[test]
    fn marker_skips_any_command() {
        let chain = FilterChain::standard(&InterceptorConfig::default());
        assert_eq!(
            chain.evaluate(&doc! { "dropDatabase": 1 }, &CommandOptions::skipped()),
            Ok(FilterVerdict::Skip)
        );
    }

    #[test]
    fn rejects_configured_commands() {
        let config = InterceptorConfig {
            reject_commands: vec!["dropDatabase".into()],
            ..InterceptorConfig::default()
        };
        let chain = FilterChain::standard(&config);

        assert_eq!(
            chain.evaluate(&doc! { "dropDatabase": 1 }, &CommandOptions::default()),
            Err(GateError::policy_rejected("dropDatabase"))
        );
    }

    #[test]
    fn earlier_skip_wins_over_later_reject() {
        let chain = FilterChain::new()
            .with(CommandNameFilter::new(["shutdown".to_string()], Vec::new()))
            .with(CommandNameFilter::new(Vec::new(), ["shutdown".to_string()]));
        assert_eq!(
            chain.evaluate(&doc! { "shutdown": 1 }, &CommandOptions::default()),
            Ok(FilterVerdict::Skip)
        );
    }

    #[test]
    fn empty_chain_pauses() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        assert_eq!(
            chain.evaluate(&doc! { "find": "a" }, &CommandOptions::default()),
            Ok(FilterVerdict::Pause)
        );
    }
}
