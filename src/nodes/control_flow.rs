//! Start, endpoint, and condition handlers.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::resolver::ResolvedInputs;
use crate::error::{NodeError, NodeResult};
use crate::graph::DiagramNode;

use super::{HandlerContext, NodeHandler, RunOutput};

// ================================
// Start
// ================================

/// Seeds the run: emits the run variables so downstream nodes can consume
/// them as a structured value.
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    async fn run(
        &self,
        _node: &DiagramNode,
        _inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        Ok(RunOutput::structured(json!(ctx.variables)))
    }
}

// ================================
// Endpoint
// ================================

#[derive(Deserialize, Default)]
struct EndpointConfig {
    /// When set, the gathered outputs are also written through the file
    /// provider.
    #[serde(default)]
    save_to_file: Option<String>,
}

/// Collects its resolved inputs as the final outputs of the run.
pub struct EndpointHandler;

#[async_trait]
impl NodeHandler for EndpointHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let gathered = json!(inputs.bodies());

        let config: EndpointConfig = parse_config(&node.config)?;
        if let Some(path) = config.save_to_file {
            let files = ctx.runtime.capabilities.files()?;
            let content = serde_json::to_string_pretty(&gathered)?;
            files
                .write(&path, &content)
                .await
                .map_err(|e| e.into_node_error("files"))?;
            ctx.log(format!("saved outputs to {}", path)).await;
        }

        Ok(RunOutput::structured(gathered))
    }
}

// ================================
// Condition
// ================================

#[derive(Deserialize)]
struct ConditionConfig {
    conditions: Vec<Comparison>,
    #[serde(default)]
    logical: LogicalOperator,
}

#[derive(Deserialize)]
struct Comparison {
    /// Input handle name or run variable, optionally with a dotted path into
    /// a structured value ("payload.count").
    operand: String,
    operator: ComparisonOperator,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    NotContains,
    Empty,
    NotEmpty,
}

/// Evaluates its branch expression over resolved inputs and run variables,
/// then routes flow to the taken branch. The branch decision travels in the
/// envelope's `branch` metadata; the scheduler arms edges from it.
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput> {
        let config: ConditionConfig = parse_config(&node.config)?;
        if config.conditions.is_empty() {
            return Err(NodeError::Configuration(
                "condition node needs at least one comparison".to_string(),
            ));
        }

        let result = match config.logical {
            LogicalOperator::And => config
                .conditions
                .iter()
                .all(|c| evaluate(c, inputs, ctx)),
            LogicalOperator::Or => config
                .conditions
                .iter()
                .any(|c| evaluate(c, inputs, ctx)),
        };

        let branch = if result { "true" } else { "false" };
        Ok(RunOutput::structured(json!({ "result": result }))
            .with_meta("branch", json!(branch)))
    }
}

fn evaluate(comparison: &Comparison, inputs: &ResolvedInputs, ctx: &HandlerContext) -> bool {
    let actual = resolve_operand(&comparison.operand, inputs, ctx);
    let expected = comparison.value.as_ref();

    match comparison.operator {
        ComparisonOperator::Equals => match (number_of(actual.as_ref()), expected.and_then(number_of_ref)) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => actual.as_ref() == expected,
        },
        ComparisonOperator::NotEquals => match (number_of(actual.as_ref()), expected.and_then(number_of_ref)) {
            (Some(a), Some(b)) => (a - b).abs() >= f64::EPSILON,
            _ => actual.as_ref() != expected,
        },
        ComparisonOperator::GreaterThan => compare_numbers(actual.as_ref(), expected, |a, b| a > b),
        ComparisonOperator::GreaterOrEqual => {
            compare_numbers(actual.as_ref(), expected, |a, b| a >= b)
        }
        ComparisonOperator::LessThan => compare_numbers(actual.as_ref(), expected, |a, b| a < b),
        ComparisonOperator::LessOrEqual => {
            compare_numbers(actual.as_ref(), expected, |a, b| a <= b)
        }
        ComparisonOperator::Contains => contains(actual.as_ref(), expected),
        ComparisonOperator::NotContains => !contains(actual.as_ref(), expected),
        ComparisonOperator::Empty => is_empty(actual.as_ref()),
        ComparisonOperator::NotEmpty => !is_empty(actual.as_ref()),
    }
}

/// Operand lookup order: input handle, then run variable. The first path
/// segment selects the source, the rest indexes into structured values.
fn resolve_operand(
    operand: &str,
    inputs: &ResolvedInputs,
    ctx: &HandlerContext,
) -> Option<Value> {
    let mut segments = operand.split('.');
    let head = segments.next()?;

    let root = inputs
        .get(head)
        .map(|env| env.body.clone())
        .or_else(|| ctx.variables.get(head).cloned())?;

    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                let index = segment.parse::<usize>().ok()?;
                if index < items.len() {
                    items.swap_remove(index)
                } else {
                    return None;
                }
            }
            _ => return None,
        };
    }
    Some(current)
}

fn number_of(value: Option<&Value>) -> Option<f64> {
    value.and_then(number_of_ref)
}

fn number_of_ref(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn compare_numbers(
    actual: Option<&Value>,
    expected: Option<&Value>,
    op: impl Fn(f64, f64) -> bool,
) -> bool {
    match (number_of(actual), expected.and_then(number_of_ref)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn contains(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    match actual {
        Some(Value::String(s)) => expected.as_str().is_some_and(|e| s.contains(e)),
        Some(Value::Array(items)) => items.contains(expected),
        Some(Value::Object(map)) => expected.as_str().is_some_and(|e| map.contains_key(e)),
        _ => false,
    }
}

fn is_empty(actual: Option<&Value>) -> bool {
    match actual {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        _ => false,
    }
}

pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(config: &Value) -> NodeResult<T> {
    // Nodes without a config block arrive as null.
    let source = if config.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(source).map_err(|e| NodeError::Configuration(e.to_string()))
}
