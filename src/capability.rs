//! External capability provider interfaces.
//!
//! Node handlers never construct their own collaborators: model inference,
//! sandboxed code execution, HTTP, filesystem access, sub-diagram runs,
//! interactive input, and conversation-memory filtering are all injected
//! behind these traits. The [`CapabilityRegistry`] is built once at process
//! start and passed to the orchestrator by reference — no process-wide
//! globals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{NodeError, NodeResult};

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("call failed: {0}")]
    Failed(String),
}

impl CapabilityError {
    /// Map into the node error taxonomy. Transient call failures stay
    /// retryable; an unavailable provider is a configuration problem.
    pub fn into_node_error(self, capability: &str) -> NodeError {
        match self {
            CapabilityError::Unavailable(reason) => NodeError::CapabilityUnavailable {
                capability: capability.to_string(),
                reason,
            },
            CapabilityError::Failed(reason) => {
                NodeError::CapabilityFailed(format!("{}: {}", capability, reason))
            }
        }
    }
}

// ================================
// Model inference
// ================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub params: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, CapabilityError>;
}

// ================================
// Code execution
// ================================

#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(
        &self,
        language: &str,
        code: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<Value, CapabilityError>;
}

// ================================
// HTTP
// ================================

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, CapabilityError>;
}

// ================================
// Filesystem
// ================================

#[async_trait]
pub trait FileAccess: Send + Sync {
    async fn read(&self, path: &str) -> Result<String, CapabilityError>;
    async fn write(&self, path: &str, content: &str) -> Result<(), CapabilityError>;
}

// ================================
// Sub-diagram runs
// ================================

#[async_trait]
pub trait SubDiagramRunner: Send + Sync {
    async fn run(
        &self,
        diagram_ref: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, CapabilityError>;
}

// ================================
// Interactive input
// ================================

#[async_trait]
pub trait InteractionChannel: Send + Sync {
    /// Resolves when an external response arrives. The engine applies its
    /// own timeout around this call.
    async fn request_input(
        &self,
        execution_id: &str,
        node_id: &str,
        prompt: &str,
    ) -> Result<Value, CapabilityError>;
}

// ================================
// Conversation-memory filtering (opaque heuristic, consumed as a service)
// ================================

#[async_trait]
pub trait MemorySelector: Send + Sync {
    async fn select(
        &self,
        messages: Vec<ChatMessage>,
        criteria: &str,
        at_most: Option<usize>,
    ) -> Result<Vec<ChatMessage>, CapabilityError>;
}

// ================================
// Registry
// ================================

/// All injected providers for one process, assembled once at startup.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    llm: Option<Arc<dyn LlmClient>>,
    code: Option<Arc<dyn CodeRunner>>,
    http: Option<Arc<dyn HttpFetcher>>,
    files: Option<Arc<dyn FileAccess>>,
    sub_diagrams: Option<Arc<dyn SubDiagramRunner>>,
    interaction: Option<Arc<dyn InteractionChannel>>,
    memory: Option<Arc<dyn MemorySelector>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, provider: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(provider);
        self
    }

    pub fn with_code_runner(mut self, provider: Arc<dyn CodeRunner>) -> Self {
        self.code = Some(provider);
        self
    }

    pub fn with_http(mut self, provider: Arc<dyn HttpFetcher>) -> Self {
        self.http = Some(provider);
        self
    }

    pub fn with_files(mut self, provider: Arc<dyn FileAccess>) -> Self {
        self.files = Some(provider);
        self
    }

    pub fn with_sub_diagrams(mut self, provider: Arc<dyn SubDiagramRunner>) -> Self {
        self.sub_diagrams = Some(provider);
        self
    }

    pub fn with_interaction(mut self, provider: Arc<dyn InteractionChannel>) -> Self {
        self.interaction = Some(provider);
        self
    }

    pub fn with_memory_selector(mut self, provider: Arc<dyn MemorySelector>) -> Self {
        self.memory = Some(provider);
        self
    }

    pub fn llm(&self) -> NodeResult<&Arc<dyn LlmClient>> {
        self.llm.as_ref().ok_or_else(|| missing("llm"))
    }

    pub fn code_runner(&self) -> NodeResult<&Arc<dyn CodeRunner>> {
        self.code.as_ref().ok_or_else(|| missing("code_runner"))
    }

    pub fn http(&self) -> NodeResult<&Arc<dyn HttpFetcher>> {
        self.http.as_ref().ok_or_else(|| missing("http"))
    }

    pub fn files(&self) -> NodeResult<&Arc<dyn FileAccess>> {
        self.files.as_ref().ok_or_else(|| missing("files"))
    }

    pub fn sub_diagrams(&self) -> NodeResult<&Arc<dyn SubDiagramRunner>> {
        self.sub_diagrams
            .as_ref()
            .ok_or_else(|| missing("sub_diagrams"))
    }

    pub fn interaction(&self) -> NodeResult<&Arc<dyn InteractionChannel>> {
        self.interaction
            .as_ref()
            .ok_or_else(|| missing("interaction"))
    }

    /// Optional: person nodes fall back to the unfiltered conversation when
    /// no selector is installed.
    pub fn memory_selector(&self) -> Option<&Arc<dyn MemorySelector>> {
        self.memory.as_ref()
    }
}

fn missing(capability: &str) -> NodeError {
    NodeError::CapabilityUnavailable {
        capability: capability.to_string(),
        reason: "no provider registered".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_reports_missing() {
        let registry = CapabilityRegistry::new();
        let err = registry.llm().err().unwrap();
        assert!(matches!(err, NodeError::CapabilityUnavailable { .. }));
        assert!(registry.memory_selector().is_none());
    }

    #[test]
    fn test_capability_error_mapping() {
        let err = CapabilityError::Failed("503".into()).into_node_error("http");
        assert!(err.is_retryable());

        let err = CapabilityError::Unavailable("not configured".into()).into_node_error("llm");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_registered_provider_is_returned() {
        struct Echo;
        #[async_trait]
        impl LlmClient for Echo {
            async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, CapabilityError> {
                Ok(LlmResponse {
                    text: request.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                    ..Default::default()
                })
            }
        }

        let registry = CapabilityRegistry::new().with_llm(Arc::new(Echo));
        let response = registry
            .llm()
            .unwrap()
            .complete(LlmRequest {
                model: "m".into(),
                messages: vec![ChatMessage::new("user", "hi")],
                params: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(response.text, "hi");
    }
}
