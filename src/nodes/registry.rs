use std::collections::HashMap;
use std::sync::Arc;

use super::{
    control_flow::{ConditionHandler, EndpointHandler, StartHandler},
    jobs::{ApiJobHandler, CodeJobHandler, DbHandler, TemplateJobHandler},
    person_job::PersonJobHandler,
    sub_diagram::SubDiagramHandler,
    user_response::UserResponseHandler,
    NodeHandler, NODE_TYPE_API_JOB, NODE_TYPE_CODE_JOB, NODE_TYPE_CONDITION, NODE_TYPE_DB,
    NODE_TYPE_ENDPOINT, NODE_TYPE_PERSON_JOB, NODE_TYPE_START, NODE_TYPE_SUB_DIAGRAM,
    NODE_TYPE_TEMPLATE_JOB, NODE_TYPE_USER_RESPONSE,
};

/// Registry of node handlers by type tag.
///
/// Built once at process start and handed to the orchestrator by reference.
/// Lookup is a pure keyed read; registration after startup is the caller's
/// concern, not the engine's.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        let mut registry = HandlerRegistry {
            handlers: HashMap::new(),
        };
        registry.register(NODE_TYPE_START, Arc::new(StartHandler));
        registry.register(NODE_TYPE_ENDPOINT, Arc::new(EndpointHandler));
        registry.register(NODE_TYPE_CONDITION, Arc::new(ConditionHandler));
        registry.register(NODE_TYPE_PERSON_JOB, Arc::new(PersonJobHandler));
        registry.register(NODE_TYPE_CODE_JOB, Arc::new(CodeJobHandler));
        registry.register(NODE_TYPE_API_JOB, Arc::new(ApiJobHandler));
        registry.register(NODE_TYPE_DB, Arc::new(DbHandler));
        registry.register(NODE_TYPE_TEMPLATE_JOB, Arc::new(TemplateJobHandler));
        registry.register(NODE_TYPE_SUB_DIAGRAM, Arc::new(SubDiagramHandler));
        registry.register(NODE_TYPE_USER_RESPONSE, Arc::new(UserResponseHandler));
        registry
    }

    /// An empty registry, for embedders that want full control over the
    /// handler set.
    pub fn empty() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, type_tag: &str, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(type_tag.to_string(), handler);
    }

    pub fn get(&self, type_tag: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(type_tag).cloned()
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.handlers.contains_key(type_tag)
    }

    pub fn type_tags(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::new();
        for tag in [
            NODE_TYPE_START,
            NODE_TYPE_ENDPOINT,
            NODE_TYPE_CONDITION,
            NODE_TYPE_PERSON_JOB,
            NODE_TYPE_CODE_JOB,
            NODE_TYPE_API_JOB,
            NODE_TYPE_DB,
            NODE_TYPE_TEMPLATE_JOB,
            NODE_TYPE_SUB_DIAGRAM,
            NODE_TYPE_USER_RESPONSE,
        ] {
            assert!(registry.contains(tag), "missing builtin: {}", tag);
        }
        assert!(!registry.contains("no-such-type"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::empty();
        assert!(!registry.contains(NODE_TYPE_START));
        assert!(registry.get(NODE_TYPE_START).is_none());
    }
}
