//! Case-type to workflow-definition binding.
//!
//! Definitions are validated (including cycle detection) at registration
//! time; a cyclic definition is rejected loudly before any instance can
//! ever be created from it.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::models::workflow::WorkflowValidationError;
use crate::models::{CaseType, WorkflowDefinition};

/// Registry of immutable workflow definitions, keyed by case type
#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: DashMap<CaseType, Arc<WorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and bind a definition to a case type. Replaces any previous
    /// binding; existing instances keep the definition they started with.
    pub fn register(
        &self,
        case_type: CaseType,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, WorkflowValidationError> {
        definition.validate()?;
        let definition = Arc::new(definition);
        info!(
            case_type = %case_type,
            definition_id = %definition.definition_id,
            version = %definition.version,
            step_count = definition.steps.len(),
            "📐 Workflow definition registered"
        );
        self.definitions.insert(case_type, Arc::clone(&definition));
        Ok(definition)
    }

    pub fn resolve(&self, case_type: CaseType) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(&case_type).map(|entry| entry.clone())
    }

    pub fn bound_case_types(&self) -> Vec<CaseType> {
        self.definitions.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepSpec;

    #[test]
    fn test_register_and_resolve() {
        let registry = DefinitionRegistry::new();
        let definition =
            WorkflowDefinition::new("spam-pipeline", "1.0.0").step(StepSpec::new("classify", "spam-classify"));

        registry
            .register(CaseType::SpamIncident, definition)
            .unwrap();
        let resolved = registry.resolve(CaseType::SpamIncident).unwrap();
        assert_eq!(resolved.definition_id, "spam-pipeline");
        assert!(registry.resolve(CaseType::CiFailure).is_none());
    }

    #[test]
    fn test_cyclic_definition_rejected_at_registration() {
        let registry = DefinitionRegistry::new();
        let cyclic = WorkflowDefinition::new("cyclic", "1.0.0")
            .step(StepSpec::new("a", "cap-a").depends_on(&["b"]))
            .step(StepSpec::new("b", "cap-b").depends_on(&["a"]));

        assert!(registry.register(CaseType::SpamIncident, cyclic).is_err());
        assert!(registry.resolve(CaseType::SpamIncident).is_none());
    }
}
