//! Model-call handler.
//!
//! A person node turns its inputs and conversation state into a model
//! request through the injected [`LlmClient`](crate::capability::LlmClient).
//! Conversation-memory filtering goes through the opaque
//! [`MemorySelector`](crate::capability::MemorySelector) service when
//! configured; the heuristic itself lives outside the engine.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::capability::{ChatMessage, LlmRequest};
use crate::core::envelope::{ContentType, Envelope};
use crate::core::resolver::ResolvedInputs;
use crate::error::{NodeError, NodeResult};
use crate::graph::DiagramNode;
use crate::template;

use super::control_flow::parse_config;
use super::{routed_error_envelope, template_context, HandlerContext, NodeHandler, RunOutput};

#[derive(Deserialize)]
struct PersonJobConfig {
    /// Model identity handed to the inference client.
    person: String,
    prompt: String,
    /// Used instead of `prompt` on the first dispatch only, for loop shapes
    /// where iteration one seeds differently.
    #[serde(default)]
    first_prompt: Option<String>,
    #[serde(default)]
    memory: Option<MemoryConfig>,
    #[serde(default)]
    params: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct MemoryConfig {
    criteria: String,
    #[serde(default)]
    at_most: Option<usize>,
}

pub struct PersonJobHandler;

#[async_trait]
impl NodeHandler for PersonJobHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: PersonJobConfig = parse_config(&node.config)?;
        let llm = ctx.runtime.capabilities.llm()?;

        let template_source = match (&config.first_prompt, ctx.is_first_dispatch()) {
            (Some(first), true) => first,
            _ => &config.prompt,
        };
        let prompt = template::render(template_source, &template_context(inputs, &ctx.variables))?;

        let mut messages = conversation_messages(inputs)?;
        if let (Some(memory), Some(selector)) = (
            &config.memory,
            ctx.runtime.capabilities.memory_selector(),
        ) {
            messages = selector
                .select(messages, &memory.criteria, memory.at_most)
                .await
                .map_err(|e| e.into_node_error("memory_selector"))?;
        }
        messages.push(ChatMessage::new("user", prompt));

        let response = llm
            .complete(LlmRequest {
                model: config.person,
                messages: messages.clone(),
                params: config.params,
            })
            .await
            .map_err(|e| e.into_node_error("llm"))?;

        messages.push(ChatMessage::new("assistant", response.text.clone()));

        let mut output = RunOutput::text(response.text)
            .with_meta("conversation", json!({ "messages": messages }));
        if let (Some(prompt_tokens), Some(completion_tokens)) =
            (response.prompt_tokens, response.completion_tokens)
        {
            output = output.with_meta(
                "usage",
                json!({
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                }),
            );
        }
        Ok(output)
    }

    fn on_error(
        &self,
        node: &DiagramNode,
        error: &NodeError,
        ctx: &HandlerContext,
    ) -> Option<Envelope> {
        routed_error_envelope(node, error, ctx)
    }
}

/// Collect prior conversation from inputs: a conversation-state envelope
/// wins; otherwise a producer that attached `conversation` metadata (an
/// upstream person node) is used.
fn conversation_messages(inputs: &ResolvedInputs) -> NodeResult<Vec<ChatMessage>> {
    for (_, envelope) in inputs.iter() {
        if envelope.content_type == ContentType::ConversationState {
            return messages_from_state(envelope.as_conversation()?);
        }
    }
    for (_, envelope) in inputs.iter() {
        if let Some(state) = envelope.meta.get("conversation") {
            return messages_from_state(state);
        }
    }
    Ok(Vec::new())
}

fn messages_from_state(state: &Value) -> NodeResult<Vec<ChatMessage>> {
    let messages = state
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            NodeError::Validation("conversation state has no messages array".to_string())
        })?;
    messages
        .iter()
        .map(|m| {
            serde_json::from_value::<ChatMessage>(m.clone())
                .map_err(|e| NodeError::Validation(format!("bad conversation message: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        CapabilityError, CapabilityRegistry, LlmClient, LlmResponse, MemorySelector,
    };
    use crate::core::events::EventEmitter;
    use crate::core::runtime::RuntimeContext;
    use std::sync::Arc;

    struct ScriptedLlm;
    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, CapabilityError> {
            Ok(LlmResponse {
                text: format!(
                    "{}:{}",
                    request.model,
                    request
                        .messages
                        .iter()
                        .map(|m| m.content.as_str())
                        .collect::<Vec<_>>()
                        .join("|")
                ),
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
            })
        }
    }

    struct KeepLast;
    #[async_trait]
    impl MemorySelector for KeepLast {
        async fn select(
            &self,
            messages: Vec<ChatMessage>,
            _criteria: &str,
            at_most: Option<usize>,
        ) -> Result<Vec<ChatMessage>, CapabilityError> {
            let keep = at_most.unwrap_or(messages.len());
            let skip = messages.len().saturating_sub(keep);
            Ok(messages.into_iter().skip(skip).collect())
        }
    }

    fn person_node(config: Value) -> DiagramNode {
        DiagramNode {
            id: "p1".into(),
            node_type: "person_job".into(),
            title: "p1".into(),
            config,
            inputs: Vec::new(),
            retry: None,
            timeout_secs: None,
            max_iterations: None,
        }
    }

    fn ctx_with(capabilities: CapabilityRegistry, dispatch: u32) -> HandlerContext {
        HandlerContext {
            execution_id: "e1".into(),
            node_id: "p1".into(),
            dispatch,
            variables: HashMap::new(),
            runtime: Arc::new(
                RuntimeContext::default().with_capabilities(Arc::new(capabilities)),
            ),
            events: EventEmitter::disabled(),
        }
    }

    #[tokio::test]
    async fn test_person_job_basic_call() {
        let caps = CapabilityRegistry::new().with_llm(Arc::new(ScriptedLlm));
        let node = person_node(json!({"person": "gpt-test", "prompt": "say {{ word }}"}));
        let mut inputs = ResolvedInputs::new();
        inputs.insert("word", Envelope::text("a", "hi", 1));

        let out = PersonJobHandler
            .run(&node, &inputs, &ctx_with(caps, 1))
            .await
            .unwrap();
        assert_eq!(out.body, json!("gpt-test:say hi"));
        assert_eq!(out.meta["usage"]["prompt_tokens"], json!(10));
        // The reply is appended to the carried conversation.
        let convo = &out.meta["conversation"]["messages"];
        assert_eq!(convo.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_person_job_first_prompt_only_on_dispatch_one() {
        let caps = CapabilityRegistry::new().with_llm(Arc::new(ScriptedLlm));
        let node = person_node(json!({
            "person": "m",
            "prompt": "again",
            "first_prompt": "first"
        }));

        let out = PersonJobHandler
            .run(&node, &ResolvedInputs::new(), &ctx_with(caps.clone(), 1))
            .await
            .unwrap();
        assert_eq!(out.body, json!("m:first"));

        let out = PersonJobHandler
            .run(&node, &ResolvedInputs::new(), &ctx_with(caps, 2))
            .await
            .unwrap();
        assert_eq!(out.body, json!("m:again"));
    }

    #[tokio::test]
    async fn test_person_job_carries_conversation_state() {
        let caps = CapabilityRegistry::new().with_llm(Arc::new(ScriptedLlm));
        let node = person_node(json!({"person": "m", "prompt": "next"}));

        let state = json!({"messages": [
            {"role": "user", "content": "earlier"},
            {"role": "assistant", "content": "reply"}
        ]});
        let mut inputs = ResolvedInputs::new();
        inputs.insert(
            "conversation",
            Envelope::conversation("prev", state, 1).unwrap(),
        );

        let out = PersonJobHandler
            .run(&node, &inputs, &ctx_with(caps, 1))
            .await
            .unwrap();
        assert_eq!(out.body, json!("m:earlier|reply|next"));
    }

    #[tokio::test]
    async fn test_person_job_memory_filter_applied() {
        let caps = CapabilityRegistry::new()
            .with_llm(Arc::new(ScriptedLlm))
            .with_memory_selector(Arc::new(KeepLast));
        let node = person_node(json!({
            "person": "m",
            "prompt": "next",
            "memory": {"criteria": "recency", "at_most": 1}
        }));

        let state = json!({"messages": [
            {"role": "user", "content": "one"},
            {"role": "assistant", "content": "two"},
            {"role": "user", "content": "three"}
        ]});
        let mut inputs = ResolvedInputs::new();
        inputs.insert(
            "conversation",
            Envelope::conversation("prev", state, 1).unwrap(),
        );

        let out = PersonJobHandler
            .run(&node, &inputs, &ctx_with(caps, 1))
            .await
            .unwrap();
        // Only the last carried message survives the filter.
        assert_eq!(out.body, json!("m:three|next"));
    }

    #[tokio::test]
    async fn test_person_job_without_llm_fails() {
        let node = person_node(json!({"person": "m", "prompt": "p"}));
        let err = PersonJobHandler
            .run(
                &node,
                &ResolvedInputs::new(),
                &ctx_with(CapabilityRegistry::new(), 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::CapabilityUnavailable { .. }));
    }
}
