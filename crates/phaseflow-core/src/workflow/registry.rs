//! Registry of named workflow definitions.

use std::collections::HashMap;

use phaseflow_types::error::DefinitionError;
use phaseflow_types::workflow::WorkflowDefinition;

/// Id of the built-in five-phase workflow.
pub const STANDARD_WORKFLOW_ID: &str = "standard";

const STANDARD_WORKFLOW_YAML: &str = include_str!("standard.yaml");

/// Definitions keyed by id. Later inserts replace earlier ones, so user
/// directories loaded after the built-ins can shadow them.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with the built-in `standard` workflow.
    pub fn with_builtins() -> Result<Self, DefinitionError> {
        let mut registry = Self::new();
        registry.insert_yaml(STANDARD_WORKFLOW_YAML)?;
        Ok(registry)
    }

    /// Validate and insert. Returns the replaced definition, if any.
    pub fn insert(
        &mut self,
        definition: WorkflowDefinition,
    ) -> Result<Option<WorkflowDefinition>, DefinitionError> {
        definition.validate()?;
        let replaced = self
            .definitions
            .insert(definition.id.clone(), definition);
        Ok(replaced)
    }

    /// Parse a YAML document and insert it. Returns the definition id.
    pub fn insert_yaml(&mut self, yaml: &str) -> Result<String, DefinitionError> {
        let definition = WorkflowDefinition::from_yaml(yaml)?;
        let id = definition.id.clone();
        if self.insert(definition)?.is_some() {
            tracing::debug!(workflow_id = %id, "workflow definition replaced");
        }
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    /// Definition ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
