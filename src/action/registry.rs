use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::BulkAction;
use crate::error::{BulkError, Result};

/// Registration metadata and sizing defaults of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub default_bucket_size: Option<usize>,
    pub default_batch_size: Option<usize>,
    /// Cap applied to commands that do not set a query limit
    pub default_query_limit: Option<u64>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_bucket_size: None,
            default_batch_size: None,
            default_query_limit: None,
        }
    }

    pub fn with_bucket_size(mut self, size: usize) -> Self {
        self.default_bucket_size = Some(size);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = Some(size);
        self
    }

    pub fn with_query_limit(mut self, limit: u64) -> Self {
        self.default_query_limit = Some(limit);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BulkError::configuration("Action name cannot be empty"));
        }
        if self.default_bucket_size == Some(0) || self.default_batch_size == Some(0) {
            return Err(BulkError::configuration(format!(
                "Action {}: default sizes must be > 0",
                self.name
            )));
        }
        if let (Some(bucket), Some(batch)) = (self.default_bucket_size, self.default_batch_size) {
            if batch > bucket {
                return Err(BulkError::configuration(format!(
                    "Action {}: default bucket size {bucket} is smaller than default batch size {batch}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredAction {
    pub descriptor: ActionDescriptor,
    pub action: Arc<dyn BulkAction>,
}

/// Actions by name, populated at startup and read-only afterwards
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredAction> {
        self.actions
            .get(name)
            .ok_or_else(|| BulkError::unknown_action(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<String, RegisteredAction>,
    errors: Vec<BulkError>,
}

impl ActionRegistryBuilder {
    pub fn register(mut self, descriptor: ActionDescriptor, action: Arc<dyn BulkAction>) -> Self {
        if let Err(err) = descriptor.validate() {
            self.errors.push(err);
            return self;
        }

        info!(
            action = %descriptor.name,
            bucket_size = ?descriptor.default_bucket_size,
            batch_size = ?descriptor.default_batch_size,
            "Registering bulk action"
        );
        let name = descriptor.name.clone();
        if self
            .actions
            .insert(name.clone(), RegisteredAction { descriptor, action })
            .is_some()
        {
            warn!(action = %name, "Action already registered, replacing");
        }
        self
    }

    /// Fails with the first invalid descriptor
    pub fn build(mut self) -> Result<ActionRegistry> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        Ok(ActionRegistry {
            actions: self.actions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingAction;

    #[test]
    fn test_resolve_registered_action() {
        let registry = ActionRegistry::builder()
            .register(
                ActionDescriptor::new("setProperties").with_bucket_size(100).with_batch_size(25),
                Arc::new(RecordingAction::new()),
            )
            .build()
            .unwrap();

        let entry = registry.resolve("setProperties").unwrap();
        assert_eq!(entry.descriptor.default_bucket_size, Some(100));
        assert!(matches!(
            registry.resolve("trash"),
            Err(BulkError::UnknownAction { .. })
        ));
        assert_eq!(registry.names(), vec!["setProperties"]);
    }

    #[test]
    fn test_invalid_descriptor_fails_build() {
        let result = ActionRegistry::builder()
            .register(
                ActionDescriptor::new("broken").with_bucket_size(10).with_batch_size(20),
                Arc::new(RecordingAction::new()),
            )
            .build();
        assert!(matches!(result, Err(BulkError::Configuration { .. })));
    }
}
