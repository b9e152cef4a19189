//! Scroller registry, populated at startup and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Scroller, ScrollerKind};
use crate::command::BulkCommand;
use crate::error::{BulkError, Result};

/// Name under which the default scroller of each kind is looked up
pub const DEFAULT_SCROLLER: &str = "default";

/// Scrollers by kind and name
#[derive(Debug, Default)]
pub struct ScrollerRegistry {
    scrollers: HashMap<(ScrollerKind, String), Arc<dyn Scroller>>,
    defaults: HashMap<ScrollerKind, String>,
}

impl ScrollerRegistry {
    pub fn builder() -> ScrollerRegistryBuilder {
        ScrollerRegistryBuilder::default()
    }

    /// Pick the scroller for `command`: its kind comes from the generic flag,
    /// its name from the command or the kind default.
    pub fn resolve(&self, command: &BulkCommand) -> Result<Arc<dyn Scroller>> {
        let kind = ScrollerKind::for_command(command);
        let name = command
            .scroller()
            .or_else(|| self.defaults.get(&kind).map(String::as_str))
            .unwrap_or(DEFAULT_SCROLLER);

        self.scrollers
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| BulkError::unknown_scroller(format!("{kind}/{name}")))
    }

    pub fn contains(&self, kind: ScrollerKind, name: &str) -> bool {
        self.scrollers.contains_key(&(kind, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.scrollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scrollers.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ScrollerRegistryBuilder {
    registry: ScrollerRegistry,
}

impl ScrollerRegistryBuilder {
    /// Register a scroller under `name`; the kind comes from the scroller
    pub fn register(mut self, name: impl Into<String>, scroller: Arc<dyn Scroller>) -> Self {
        let name = name.into();
        let kind = scroller.kind();
        info!(kind = %kind, name = %name, "Registering scroller");
        if self
            .registry
            .scrollers
            .insert((kind, name.clone()), scroller)
            .is_some()
        {
            warn!(kind = %kind, name = %name, "Scroller already registered, replacing");
        }
        self
    }

    /// Scroller used for `kind` when a command names none
    pub fn default_for(mut self, kind: ScrollerKind, name: impl Into<String>) -> Self {
        self.registry.defaults.insert(kind, name.into());
        self
    }

    pub fn build(self) -> Result<ScrollerRegistry> {
        for (kind, name) in &self.registry.defaults {
            if !self.registry.contains(*kind, name) {
                return Err(BulkError::configuration(format!(
                    "Default {kind} scroller '{name}' is not registered"
                )));
            }
        }
        Ok(self.registry)
    }
}
