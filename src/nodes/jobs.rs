//! Work-performing handlers: code execution, HTTP calls, file access, and
//! template rendering. Each delegates its actual I/O to an injected
//! capability provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::capability::HttpRequest;
use crate::core::envelope::Envelope;
use crate::core::resolver::ResolvedInputs;
use crate::error::{NodeError, NodeResult};
use crate::graph::DiagramNode;
use crate::template;

use super::control_flow::parse_config;
use super::{routed_error_envelope, HandlerContext, NodeHandler, RunOutput};

// ================================
// code_job
// ================================

#[derive(Deserialize)]
struct CodeJobConfig {
    #[serde(default = "default_language")]
    language: String,
    code: String,
}

fn default_language() -> String {
    "python".to_string()
}

/// Runs code in the injected sandbox. Inputs are passed by handle name.
pub struct CodeJobHandler;

#[async_trait]
impl NodeHandler for CodeJobHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: CodeJobConfig = parse_config(&node.config)?;
        let runner = ctx.runtime.capabilities.code_runner()?;
        let result = runner
            .run(&config.language, &config.code, inputs.bodies())
            .await
            .map_err(|e| e.into_node_error("code_runner"))?;
        Ok(output_for_value(result))
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

// ================================
// api_job
// ================================

#[derive(Deserialize)]
struct ApiJobConfig {
    /// Rendered as a template over inputs and variables.
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Calls an HTTP endpoint through the injected client.
pub struct ApiJobHandler;

#[async_trait]
impl NodeHandler for ApiJobHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: ApiJobConfig = parse_config(&node.config)?;
        let http = ctx.runtime.capabilities.http()?;

        let url = template::render(
            &config.url,
            &super::template_context(inputs, &ctx.variables),
        )?;
        let response = http
            .fetch(HttpRequest {
                method: config.method,
                url,
                headers: config.headers,
                body: config.body,
            })
            .await
            .map_err(|e| e.into_node_error("http"))?;

        if response.status >= 400 {
            return Err(NodeError::CapabilityFailed(format!(
                "http: status {}",
                response.status
            )));
        }
        Ok(RunOutput::structured(json!({
            "status": response.status,
            "body": response.body,
        })))
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

// ================================
// db
// ================================

#[derive(Deserialize)]
struct DbConfig {
    operation: DbOperation,
    path: String,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DbOperation {
    Read,
    Write,
}

/// File-backed read/write through the injected file provider.
pub struct DbHandler;

#[async_trait]
impl NodeHandler for DbHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: DbConfig = parse_config(&node.config)?;
        let files = ctx.runtime.capabilities.files()?;

        match config.operation {
            DbOperation::Read => {
                let content = files
                    .read(&config.path)
                    .await
                    .map_err(|e| e.into_node_error("files"))?;
                Ok(RunOutput::text(content))
            }
            DbOperation::Write => {
                let content = inputs
                    .primary()
                    .map(|env| env.to_display_string())
                    .unwrap_or_default();
                files
                    .write(&config.path, &content)
                    .await
                    .map_err(|e| e.into_node_error("files"))?;
                Ok(RunOutput::structured(json!({
                    "path": config.path,
                    "bytes": content.len(),
                })))
            }
        }
    }
}

// ================================
// template_job
// ================================

#[derive(Deserialize)]
struct TemplateJobConfig {
    template: String,
}

/// Renders a template over inputs and run variables.
pub struct TemplateJobHandler;

#[async_trait]
impl NodeHandler for TemplateJobHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: TemplateJobConfig = parse_config(&node.config)?;
        let rendered = template::render(
            &config.template,
            &super::template_context(inputs, &ctx.variables),
        )?;
        Ok(RunOutput::text(rendered))
    }
}

fn output_for_value(value: Value) -> RunOutput {
    match value {
        Value::String(s) => RunOutput::text(s),
        other => RunOutput::structured(other),
    }
}
