//! Sub-diagram handler: delegates a child run to the injected runner.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::resolver::ResolvedInputs;
use crate::error::NodeResult;
use crate::graph::DiagramNode;

use super::control_flow::parse_config;
use super::{HandlerContext, NodeHandler, RunOutput};

#[derive(Deserialize)]
struct SubDiagramConfig {
    /// Reference understood by the injected runner (diagram id or path).
    diagram: String,
}

pub struct SubDiagramHandler;

#[async_trait]
impl NodeHandler for SubDiagramHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: SubDiagramConfig = parse_config(&node.config)?;
        let runner = ctx.runtime.capabilities.sub_diagrams()?;
        let outputs = runner
            .run(&config.diagram, inputs.bodies())
            .await
            .map_err(|e| e.into_node_error("sub_diagrams"))?;
        Ok(RunOutput::structured(json!(outputs)))
    }
}
