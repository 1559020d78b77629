//! The orchestrator: one instance drives one execution.
//!
//! Loop shape: ask the order calculator for the ready batch → resolve inputs
//! → dispatch every node in the batch concurrently → await the full batch
//! (barrier, not streaming — a conditional's evaluation may depend on
//! siblings) → record envelopes, apply branch/loop/failure transitions →
//! checkpoint → repeat until terminal.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::error::{EngineError, EngineResult, NodeError};
use crate::graph::{CompiledDiagram, DiagramNode};
use crate::nodes::{HandlerContext, HandlerRegistry, NodeHandler, NODE_TYPE_CONDITION, NODE_TYPE_ENDPOINT};
use crate::schema::{BackoffStrategy, RetryPolicy};

use super::context::{ExecutionContext, ExecutionStatus, NodeStatus};
use super::envelope::Envelope;
use super::events::{EventEmitter, ExecutionEvent};
use super::resolver::{resolve_inputs, ResolvedInputs};
use super::runtime::RuntimeContext;
use super::scheduler::OrderCalculator;
use super::state::{ExecutionSnapshot, StateManager};
use super::tracker::{ExecutionTracker, TrackEvent};

/// External command to control a running execution.
#[derive(Debug, Clone)]
pub enum Command {
    Abort { reason: Option<String> },
    Pause,
    Resume,
    UpdateVariables { variables: HashMap<String, Value> },
}

/// Engine limits and dispatch knobs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Upper bound on total node dispatches for one run.
    pub max_steps: i32,
    pub max_execution_time_secs: u64,
    /// Concurrent dispatches within a batch; 0 means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Checkpoint through the state manager after every batch.
    #[serde(default = "default_checkpoint_every_batch")]
    pub checkpoint_every_batch: bool,
}

fn default_checkpoint_every_batch() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: 500,
            max_execution_time_secs: 600,
            max_concurrency: 0,
            checkpoint_every_batch: true,
        }
    }
}

enum TaskResult {
    Success(Envelope),
    /// The handler converted a failure into a routed error envelope.
    Recovered(Envelope, NodeError),
    Failed(NodeError),
}

struct NodeOutcome {
    node_id: String,
    result: TaskResult,
}

pub struct Orchestrator {
    diagram: Arc<CompiledDiagram>,
    registry: Arc<HandlerRegistry>,
    runtime: Arc<RuntimeContext>,
    config: EngineConfig,
    ctx: ExecutionContext,
    tracker: ExecutionTracker,
    emitter: EventEmitter,
    state: Option<Arc<StateManager>>,
    command_rx: Option<mpsc::Receiver<Command>>,
    status_tx: Option<watch::Sender<ExecutionStatus>>,
    final_outputs: HashMap<String, Value>,
    step_count: i32,
}

impl Orchestrator {
    pub fn new(
        diagram: Arc<CompiledDiagram>,
        registry: Arc<HandlerRegistry>,
        runtime: Arc<RuntimeContext>,
        config: EngineConfig,
    ) -> Self {
        let now = runtime.now_millis();
        let ctx = ExecutionContext::new(
            runtime.id_generator.next_id(),
            diagram.id.clone(),
            diagram.node_ids().map(|s| s.to_string()).collect::<Vec<_>>(),
            diagram.variables.clone(),
            now,
        );
        Orchestrator {
            diagram,
            registry,
            runtime,
            config,
            ctx,
            tracker: ExecutionTracker::new(),
            emitter: EventEmitter::disabled(),
            state: None,
            command_rx: None,
            status_tx: None,
            final_outputs: HashMap::new(),
            step_count: 0,
        }
    }

    /// Resume from a persisted snapshot. Already-completed nodes are never
    /// re-run; the scheduler recomputes readiness from the restored sets.
    pub fn from_snapshot(
        diagram: Arc<CompiledDiagram>,
        registry: Arc<HandlerRegistry>,
        runtime: Arc<RuntimeContext>,
        config: EngineConfig,
        snapshot: &ExecutionSnapshot,
    ) -> Self {
        let mut ctx = snapshot.restore();
        // Completed work is never repeated. Everything else gets a fresh
        // chance: mid-flight and failed nodes re-dispatch, and skipped nodes
        // return to Pending so skip propagation can re-derive them from the
        // restored state instead of a stale failure.
        let retriable: Vec<String> = ctx
            .node_states()
            .iter()
            .filter(|(_, state)| {
                matches!(
                    state.status,
                    NodeStatus::Running | NodeStatus::Failed | NodeStatus::Skipped
                )
            })
            .map(|(id, _)| id.clone())
            .collect();
        for node_id in retriable {
            ctx.reset_for_iteration(&node_id);
        }
        ctx.error = None;
        ctx.ended_at = None;
        Orchestrator {
            diagram,
            registry,
            runtime,
            config,
            ctx,
            tracker: ExecutionTracker::new(),
            emitter: EventEmitter::disabled(),
            state: None,
            command_rx: None,
            status_tx: None,
            final_outputs: HashMap::new(),
            step_count: 0,
        }
    }

    pub fn with_events(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_state_manager(mut self, state: Arc<StateManager>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_command_channel(mut self, rx: mpsc::Receiver<Command>) -> Self {
        self.command_rx = Some(rx);
        self
    }

    pub fn with_status_watch(mut self, tx: watch::Sender<ExecutionStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.ctx.execution_id
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot::capture(&self.ctx)
    }

    fn now(&self) -> i64 {
        self.runtime.now_millis()
    }

    fn set_status(&mut self, status: ExecutionStatus) {
        self.ctx.status = status;
        if let Some(tx) = &self.status_tx {
            let _ = tx.send(status);
        }
    }

    /// Drive the execution to its terminal status. Returns the gathered
    /// endpoint outputs on completion.
    pub async fn run(&mut self) -> EngineResult<HashMap<String, Value>> {
        self.set_status(ExecutionStatus::Running);
        self.emitter
            .emit(ExecutionEvent::ExecutionStarted {
                execution_id: self.ctx.execution_id.clone(),
                diagram_id: self.ctx.diagram_id.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await;

        let diagram = self.diagram.clone();
        let calc = OrderCalculator::new(diagram.as_ref());

        loop {
            self.poll_commands().await?;

            let now = self.now();
            for node_id in calc.propagate_skips(&mut self.ctx, now) {
                self.tracker.record(node_id.as_str(), TrackEvent::Skipped, now);
                self.emitter
                    .emit(ExecutionEvent::Log {
                        execution_id: self.ctx.execution_id.clone(),
                        node_id: Some(node_id),
                        message: "skipped: no live path can reach this node".to_string(),
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
            }

            if let Some(status) = calc.terminal_status(&mut self.ctx, now) {
                return self.finalize(status).await;
            }

            let batch = calc.ready_batch(&self.ctx);
            if batch.is_empty() {
                // Quiescence without a terminal classification cannot happen:
                // terminal_status covers exactly this condition.
                return Err(self
                    .fail_run(EngineError::Internal(
                        "scheduler returned an empty batch on a live run".to_string(),
                    ))
                    .await);
            }

            self.check_limits(batch.len()).await?;
            let outcomes = self.dispatch_batch(batch).await?;

            for outcome in outcomes {
                self.apply_outcome(&calc, outcome).await?;
            }

            if self.config.checkpoint_every_batch {
                if let Some(state) = &self.state {
                    state.save(&ExecutionSnapshot::capture(&self.ctx)).await?;
                }
            }
        }
    }

    async fn check_limits(&mut self, batch_len: usize) -> EngineResult<()> {
        self.step_count += batch_len as i32;
        if self.step_count > self.config.max_steps {
            let err = EngineError::MaxStepsExceeded(self.config.max_steps);
            return Err(self.fail_run(err).await);
        }
        let elapsed = self
            .runtime
            .time_provider
            .elapsed_secs(self.ctx.started_at);
        if elapsed > self.config.max_execution_time_secs {
            return Err(self.fail_run(EngineError::ExecutionTimeout).await);
        }
        Ok(())
    }

    /// Dispatch one ready batch and await all of it. Within the batch,
    /// `max_concurrency` caps simultaneous tasks; the barrier holds either
    /// way.
    async fn dispatch_batch(&mut self, batch: Vec<String>) -> EngineResult<Vec<NodeOutcome>> {
        let mut queue: VecDeque<String> = batch.into();
        let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();
        let mut outcomes = Vec::new();
        let cap = self.config.max_concurrency;

        loop {
            while (cap == 0 || join_set.len() < cap) && !queue.is_empty() {
                let node_id = queue.pop_front().expect("queue non-empty");
                let now = self.now();
                let dispatch = self.ctx.begin_dispatch(&node_id, now);
                self.tracker.record(node_id.as_str(), TrackEvent::Started, now);
                self.emitter
                    .emit(ExecutionEvent::NodeStarted {
                        execution_id: self.ctx.execution_id.clone(),
                        node_id: node_id.clone(),
                        dispatch,
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
                if let (Some(state), Some(node_state)) = (&self.state, self.ctx.state(&node_id))
                {
                    state
                        .update_node_status(&self.ctx.execution_id, &node_id, node_state.clone())
                        .await?;
                }

                let node = self
                    .diagram
                    .node(&node_id)
                    .ok_or_else(|| EngineError::NodeNotFound(node_id.clone()))?
                    .clone();
                let handler = self
                    .registry
                    .get(&node.node_type)
                    .ok_or_else(|| EngineError::HandlerNotFound(node.node_type.clone()))?;

                let handler_ctx = HandlerContext {
                    execution_id: self.ctx.execution_id.clone(),
                    node_id: node_id.clone(),
                    dispatch,
                    variables: self.ctx.variables().clone(),
                    runtime: self.runtime.clone(),
                    events: self.emitter.clone(),
                };

                match resolve_inputs(&self.diagram, &node_id, &self.ctx, now) {
                    Ok(inputs) => {
                        join_set.spawn(execute_node(handler, node, inputs, handler_ctx));
                    }
                    Err(e) => {
                        // Resolution failures go through the same recovery
                        // path as run failures.
                        let result = match handler.on_error(&node, &e, &handler_ctx) {
                            Some(envelope) => TaskResult::Recovered(envelope, e),
                            None => TaskResult::Failed(e),
                        };
                        outcomes.push(NodeOutcome { node_id, result });
                    }
                }
            }

            if join_set.is_empty() {
                if queue.is_empty() {
                    break;
                }
                continue;
            }

            // Await the next completion, staying responsive to control
            // commands while tasks are suspended in external calls.
            enum BatchWait {
                Joined(Option<Result<NodeOutcome, tokio::task::JoinError>>),
                Cmd(Option<Command>),
            }
            let wait = if let Some(rx) = &mut self.command_rx {
                tokio::select! {
                    joined = join_set.join_next() => BatchWait::Joined(joined),
                    command = rx.recv() => BatchWait::Cmd(command),
                }
            } else {
                BatchWait::Joined(join_set.join_next().await)
            };

            match wait {
                BatchWait::Joined(Some(Ok(outcome))) => outcomes.push(outcome),
                BatchWait::Joined(Some(Err(join_error))) => {
                    if !join_error.is_cancelled() {
                        return Err(EngineError::Internal(format!(
                            "node task join error: {}",
                            join_error
                        )));
                    }
                }
                BatchWait::Joined(None) => {}
                BatchWait::Cmd(Some(Command::Abort { reason })) => {
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    return Err(self.cancel_run(reason).await);
                }
                BatchWait::Cmd(Some(Command::UpdateVariables { variables })) => {
                    self.ctx.merge_variables(variables);
                }
                BatchWait::Cmd(Some(Command::Pause | Command::Resume)) => {
                    // Pause takes effect at the next batch boundary.
                }
                BatchWait::Cmd(None) => {
                    // All senders gone; stop selecting on the channel.
                    self.command_rx = None;
                }
            }
        }

        Ok(outcomes)
    }

    async fn apply_outcome(
        &mut self,
        calc: &OrderCalculator<'_>,
        outcome: NodeOutcome,
    ) -> EngineResult<()> {
        let node_id = outcome.node_id;
        match outcome.result {
            TaskResult::Success(envelope) => {
                self.complete_node(calc, &node_id, envelope).await?;
            }
            TaskResult::Recovered(envelope, error) => {
                self.emitter
                    .emit(ExecutionEvent::Log {
                        execution_id: self.ctx.execution_id.clone(),
                        node_id: Some(node_id.clone()),
                        message: format!("failure recovered into error envelope: {}", error),
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
                self.complete_node(calc, &node_id, envelope).await?;
            }
            TaskResult::Failed(error) => {
                let now = self.now();
                self.ctx.mark_failed(&node_id, error.to_string(), now);
                self.tracker.record(node_id.as_str(), TrackEvent::Failed, now);
                self.emitter
                    .emit(ExecutionEvent::NodeFailed {
                        execution_id: self.ctx.execution_id.clone(),
                        node_id: node_id.clone(),
                        error: error.to_string(),
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
                if let (Some(state), Some(node_state)) = (&self.state, self.ctx.state(&node_id))
                {
                    state
                        .update_node_status(&self.ctx.execution_id, &node_id, node_state.clone())
                        .await?;
                }
                // Failure propagation happens via skip propagation at the
                // top of the loop; the run keeps going until quiescent.
            }
        }
        Ok(())
    }

    async fn complete_node(
        &mut self,
        calc: &OrderCalculator<'_>,
        node_id: &str,
        mut envelope: Envelope,
    ) -> EngineResult<()> {
        let now = self.now();
        let node_type = self
            .diagram
            .node(node_id)
            .map(|n| n.node_type.clone())
            .unwrap_or_default();

        if node_type == NODE_TYPE_CONDITION {
            envelope = self.enforce_iteration_bound(calc, node_id, envelope).await;
        }

        self.ctx.store_output(node_id, envelope.clone(), now)?;
        self.tracker.record(node_id, TrackEvent::Completed, now);
        self.emitter
            .emit(ExecutionEvent::NodeCompleted {
                execution_id: self.ctx.execution_id.clone(),
                node_id: node_id.to_string(),
                output: envelope.body.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await;
        if let (Some(state), Some(node_state)) = (&self.state, self.ctx.state(node_id)) {
            state
                .update_node_status(&self.ctx.execution_id, node_id, node_state.clone())
                .await?;
        }

        if node_type == NODE_TYPE_ENDPOINT {
            if let Value::Object(map) = &envelope.body {
                for (key, value) in map {
                    self.final_outputs.insert(key.clone(), value.clone());
                }
            }
        }

        for reset in calc.apply_completion(&mut self.ctx, node_id) {
            self.emitter
                .emit(ExecutionEvent::Log {
                    execution_id: self.ctx.execution_id.clone(),
                    node_id: Some(reset),
                    message: "re-armed for next loop iteration".to_string(),
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }
        Ok(())
    }

    /// A condition that has consumed its iteration budget is forced onto the
    /// branch that leaves its cycle, whatever it just evaluated.
    async fn enforce_iteration_bound(
        &mut self,
        calc: &OrderCalculator<'_>,
        node_id: &str,
        envelope: Envelope,
    ) -> Envelope {
        let Some(max) = self.diagram.node(node_id).and_then(|n| n.max_iterations) else {
            return envelope;
        };
        if self.ctx.exec_count(node_id) < max {
            return envelope;
        }
        let Some(exit) = calc.exit_branch(node_id) else {
            return envelope;
        };
        if envelope.branch() == Some(exit.as_str()) {
            return envelope;
        }
        tracing::warn!(
            node_id,
            max_iterations = max,
            "iteration bound reached; forcing exit branch"
        );
        self.emitter
            .emit(ExecutionEvent::Log {
                execution_id: self.ctx.execution_id.clone(),
                node_id: Some(node_id.to_string()),
                message: format!("iteration bound {} reached; taking '{}' branch", max, exit),
                timestamp: chrono::Utc::now(),
            })
            .await;
        envelope
            .with_meta("forced_exit", Value::Bool(true))
            .with_branch(exit)
    }

    /// Handle control commands at the batch boundary. Pause parks the
    /// orchestrator until Resume or Abort.
    async fn poll_commands(&mut self) -> EngineResult<()> {
        let mut paused = false;
        loop {
            let command = {
                let Some(rx) = &mut self.command_rx else {
                    return Ok(());
                };
                if paused {
                    match rx.recv().await {
                        Some(command) => command,
                        None => return Ok(()),
                    }
                } else {
                    match rx.try_recv() {
                        Ok(command) => command,
                        Err(_) => return Ok(()),
                    }
                }
            };

            match command {
                Command::Abort { reason } => {
                    return Err(self.cancel_run(reason).await);
                }
                Command::Pause => {
                    paused = true;
                    self.set_status(ExecutionStatus::Paused);
                }
                Command::Resume => {
                    paused = false;
                    self.set_status(ExecutionStatus::Running);
                }
                Command::UpdateVariables { variables } => {
                    self.ctx.merge_variables(variables);
                }
            }
        }
    }

    /// Cancellation: every non-terminal node transitions to Skipped;
    /// already-produced envelopes stay inspectable in the final record.
    async fn cancel_run(&mut self, reason: Option<String>) -> EngineError {
        let now = self.now();
        let non_terminal: Vec<String> = self
            .diagram
            .node_ids()
            .filter(|id| !self.ctx.status_of(id).is_terminal())
            .map(|id| id.to_string())
            .collect();
        for node_id in non_terminal {
            self.ctx.mark_skipped(&node_id, now);
            self.tracker.record(node_id.as_str(), TrackEvent::Skipped, now);
        }
        let reason = reason.unwrap_or_else(|| "cancelled by command".to_string());
        self.fail_run(EngineError::Aborted(reason)).await
    }

    async fn fail_run(&mut self, error: EngineError) -> EngineError {
        let now = self.now();
        self.ctx.ended_at = Some(now);
        self.ctx.error = Some(error.to_string());
        self.set_status(ExecutionStatus::Failed);
        self.emitter
            .emit(ExecutionEvent::ExecutionFailed {
                execution_id: self.ctx.execution_id.clone(),
                error: error.to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await;
        if let Some(state) = &self.state {
            let _ = state.save(&ExecutionSnapshot::capture(&self.ctx)).await;
        }
        error
    }

    async fn finalize(
        &mut self,
        status: ExecutionStatus,
    ) -> EngineResult<HashMap<String, Value>> {
        let now = self.now();
        self.ctx.ended_at = Some(now);

        match status {
            ExecutionStatus::Completed => {
                self.set_status(ExecutionStatus::Completed);
                self.emitter
                    .emit(ExecutionEvent::ExecutionCompleted {
                        execution_id: self.ctx.execution_id.clone(),
                        outputs: self.final_outputs.clone(),
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
                if let Some(state) = &self.state {
                    state.save(&ExecutionSnapshot::capture(&self.ctx)).await?;
                }
                Ok(self.final_outputs.clone())
            }
            _ => {
                let failed = self
                    .ctx
                    .nodes_with_status(NodeStatus::Failed)
                    .first()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let error = self
                    .ctx
                    .state(&failed)
                    .and_then(|s| s.error.clone())
                    .unwrap_or_else(|| "execution failed".to_string());
                let err = self
                    .fail_run(EngineError::NodeFailed {
                        node_id: failed,
                        error,
                    })
                    .await;
                Err(err)
            }
        }
    }
}

/// One node task: prepare → run (with per-node timeout) → serialize →
/// post-execute, retried per the node's policy, with `on_error` recovery as
/// the last resort.
async fn execute_node(
    handler: Arc<dyn NodeHandler>,
    node: DiagramNode,
    inputs: ResolvedInputs,
    ctx: HandlerContext,
) -> NodeOutcome {
    let retry = node.retry.clone().unwrap_or_default();
    let mut attempt: u32 = 0;

    let error = loop {
        match run_once(&handler, &node, inputs.clone(), &ctx).await {
            Ok(envelope) => {
                return NodeOutcome {
                    node_id: node.id.clone(),
                    result: TaskResult::Success(envelope),
                };
            }
            Err(e) => {
                let may_retry = attempt < retry.max_retries
                    && (!retry.retry_on_retryable_only || e.is_retryable());
                if !may_retry {
                    break e;
                }
                let delay = retry_interval_ms(&retry, attempt);
                ctx.log(format!(
                    "attempt {} failed ({}); retrying in {}ms",
                    attempt + 1,
                    e,
                    delay
                ))
                .await;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    };

    let result = match handler.on_error(&node, &error, &ctx) {
        Some(envelope) => TaskResult::Recovered(envelope, error),
        None => TaskResult::Failed(error),
    };
    NodeOutcome {
        node_id: node.id.clone(),
        result,
    }
}

async fn run_once(
    handler: &Arc<dyn NodeHandler>,
    node: &DiagramNode,
    inputs: ResolvedInputs,
    ctx: &HandlerContext,
) -> Result<Envelope, NodeError> {
    let inputs = handler.prepare_inputs(node, inputs)?;

    let output = match node.timeout_secs {
        Some(secs) => tokio::time::timeout(
            Duration::from_secs(secs),
            handler.run(node, &inputs, ctx),
        )
        .await
        .map_err(|_| NodeError::Timeout)??,
        None => handler.run(node, &inputs, ctx).await?,
    };

    let envelope = handler.serialize_output(node, output, ctx)?;
    handler.post_execute(node, &envelope, ctx).await?;
    Ok(envelope)
}

/// Backoff for the next retry, in milliseconds. `attempt` is the 0-indexed
/// retry that just failed.
fn retry_interval_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    let base = policy.retry_interval_ms as f64;
    let interval = match policy.backoff {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Exponential => base * policy.backoff_multiplier.powi(attempt as i32),
        BackoffStrategy::ExponentialWithJitter => {
            use rand::Rng;
            let exponential = base * policy.backoff_multiplier.powi(attempt as i32);
            exponential * (0.5 + rand::rng().random::<f64>() * 0.5)
        }
    };
    (interval as u64).min(policy.max_interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_interval_ms: 100,
            backoff,
            backoff_multiplier: 2.0,
            max_interval_ms: 350,
            retry_on_retryable_only: true,
        }
    }

    #[test]
    fn test_retry_interval_fixed() {
        let p = policy(BackoffStrategy::Fixed);
        assert_eq!(retry_interval_ms(&p, 0), 100);
        assert_eq!(retry_interval_ms(&p, 5), 100);
    }

    #[test]
    fn test_retry_interval_exponential_capped() {
        let p = policy(BackoffStrategy::Exponential);
        assert_eq!(retry_interval_ms(&p, 0), 100);
        assert_eq!(retry_interval_ms(&p, 1), 200);
        // 400 would exceed the cap.
        assert_eq!(retry_interval_ms(&p, 2), 350);
    }

    #[test]
    fn test_retry_interval_jitter_within_bounds() {
        let p = policy(BackoffStrategy::ExponentialWithJitter);
        for _ in 0..32 {
            let interval = retry_interval_ms(&p, 1);
            assert!((100..=350).contains(&interval), "got {}", interval);
        }
    }

    #[test]
    fn test_engine_config_defaults_and_serde() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps, 500);
        assert_eq!(config.max_execution_time_secs, 600);
        assert_eq!(config.max_concurrency, 0);
        assert!(config.checkpoint_every_batch);

        let parsed: EngineConfig = serde_json::from_str(
            r#"{"max_steps": 10, "max_execution_time_secs": 5}"#,
        )
        .unwrap();
        assert_eq!(parsed.max_steps, 10);
        assert_eq!(parsed.max_concurrency, 0);
        assert!(parsed.checkpoint_every_batch);
    }
}
