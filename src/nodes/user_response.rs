//! Interactive-response handler.
//!
//! Suspends on the injected interaction channel until an external response
//! arrives or the configured wait expires, at which point the node fails
//! with a timeout and the usual retry policy applies.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::core::resolver::ResolvedInputs;
use crate::error::{NodeError, NodeResult};
use crate::graph::DiagramNode;
use crate::template;

use super::control_flow::parse_config;
use super::{template_context, HandlerContext, NodeHandler, RunOutput};

#[derive(Deserialize)]
struct UserResponseConfig {
    /// Rendered as a template over inputs and variables.
    prompt: String,
    #[serde(default = "default_wait_secs")]
    timeout_secs: u64,
}

fn default_wait_secs() -> u64 {
    60
}

pub struct UserResponseHandler;

#[async_trait]
impl NodeHandler for UserResponseHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: UserResponseConfig = parse_config(&node.config)?;
        let channel = ctx.runtime.capabilities.interaction()?;
        let prompt = template::render(&config.prompt, &template_context(inputs, &ctx.variables))?;

        let response = tokio::time::timeout(
            Duration::from_secs(config.timeout_secs),
            channel.request_input(&ctx.execution_id, &ctx.node_id, &prompt),
        )
        .await
        .map_err(|_| NodeError::Timeout)?
        .map_err(|e| e.into_node_error("interaction"))?;

        Ok(match response {
            Value::String(s) => RunOutput::text(s),
            other => RunOutput::structured(other),
        })
    }
}
