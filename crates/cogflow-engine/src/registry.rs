use std::collections::HashMap;
use std::sync::Arc;

use cogflow_core::config::AgentDecl;
use cogflow_core::error::{CogError, Result};
use cogflow_core::traits::AgentRunner;

/// Builds an agent collaborator from its declaration.
pub type AgentCtor = Arc<dyn Fn(&AgentDecl) -> Result<Arc<dyn AgentRunner>> + Send + Sync>;

/// Maps agent type tags to constructors.
///
/// Populated at startup by the embedding application; an unknown tag in a
/// workflow document is a configuration error, not a runtime lookup
/// failure.
pub struct AgentRegistry {
    ctors: HashMap<String, AgentCtor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Register a constructor for an agent type tag.
    pub fn register<F>(&mut self, type_tag: impl Into<String>, ctor: F)
    where
        F: Fn(&AgentDecl) -> Result<Arc<dyn AgentRunner>> + Send + Sync + 'static,
    {
        self.ctors.insert(type_tag.into(), Arc::new(ctor));
    }

    /// Build the agent declared by `decl`.
    pub fn build(&self, decl: &AgentDecl) -> Result<Arc<dyn AgentRunner>> {
        let ctor = self.ctors.get(&decl.agent_type).ok_or_else(|| {
            CogError::Config(format!(
                "unknown agent type '{}' for node '{}'",
                decl.agent_type, decl.id
            ))
        })?;
        ctor(decl)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
