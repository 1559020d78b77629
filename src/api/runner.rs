//! High-level execution runner and builder.
//!
//! [`ExecutionRunner`] (constructed via [`ExecutionRunnerBuilder`]) is the
//! main entry point for executing a diagram schema. It compiles the diagram,
//! wires the orchestrator to handlers, capabilities, persistence, and the
//! event stream, and spawns the run as its own task.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::capability::CapabilityRegistry;
use crate::core::context::ExecutionStatus;
use crate::core::events::{event_channel, EventEmitter, ExecutionEvent};
use crate::core::orchestrator::{Command, EngineConfig, Orchestrator};
use crate::core::runtime::RuntimeContext;
use crate::core::state::{ExecutionSnapshot, StateManager, StateStore};
use crate::error::{EngineError, EngineResult};
use crate::graph::compile;
use crate::nodes::HandlerRegistry;
use crate::schema::DiagramSchema;

pub struct ExecutionRunner;

impl ExecutionRunner {
    /// Create a new builder from a diagram schema.
    pub fn builder(schema: DiagramSchema) -> ExecutionRunnerBuilder {
        ExecutionRunnerBuilder {
            schema,
            variables: HashMap::new(),
            config: EngineConfig::default(),
            registry: Arc::new(HandlerRegistry::new()),
            capabilities: Arc::new(CapabilityRegistry::new()),
            runtime: None,
            state_store: None,
            resume_from: None,
            collect_events: true,
            event_capacity: 256,
        }
    }
}

/// Builder for configuring and launching an execution.
pub struct ExecutionRunnerBuilder {
    schema: DiagramSchema,
    variables: HashMap<String, Value>,
    config: EngineConfig,
    registry: Arc<HandlerRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    runtime: Option<Arc<RuntimeContext>>,
    state_store: Option<Arc<dyn StateStore>>,
    resume_from: Option<String>,
    collect_events: bool,
    event_capacity: usize,
}

impl ExecutionRunnerBuilder {
    /// Merge run variables over the diagram's declared ones.
    pub fn variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the handler registry (defaults to the builtin set).
    pub fn handlers(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = Arc::new(capabilities);
        self
    }

    /// Override the runtime wholesale (time/id providers included). Wins
    /// over [`capabilities`](Self::capabilities).
    pub fn runtime(mut self, runtime: Arc<RuntimeContext>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Persist checkpoints to this store.
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Resume the given execution from its persisted snapshot instead of
    /// starting fresh. Requires a state store.
    pub fn resume_from(mut self, execution_id: impl Into<String>) -> Self {
        self.resume_from = Some(execution_id.into());
        self
    }

    pub fn collect_events(mut self, collect: bool) -> Self {
        self.collect_events = collect;
        self
    }

    /// Compile, wire, and spawn the execution.
    pub async fn start(self) -> EngineResult<ExecutionHandle> {
        let mut schema = self.schema;
        schema.variables.extend(self.variables);

        let diagram = Arc::new(compile(&schema, &self.registry)?);
        let runtime = self.runtime.unwrap_or_else(|| {
            Arc::new(RuntimeContext::default().with_capabilities(self.capabilities.clone()))
        });
        let state = self.state_store.map(StateManager::new).map(Arc::new);

        let mut orchestrator = match &self.resume_from {
            Some(execution_id) => {
                let manager = state.clone().ok_or_else(|| {
                    EngineError::Persistence(
                        "resume requires a state store".to_string(),
                    )
                })?;
                let snapshot = manager.load(execution_id).await?;
                Orchestrator::from_snapshot(
                    diagram,
                    self.registry.clone(),
                    runtime,
                    self.config,
                    &snapshot,
                )
            }
            None => Orchestrator::new(diagram, self.registry.clone(), runtime, self.config),
        };

        let (emitter, events) = if self.collect_events {
            let (emitter, rx) = event_channel(self.event_capacity);
            (emitter, Some(rx))
        } else {
            (EventEmitter::disabled(), None)
        };
        orchestrator = orchestrator.with_events(emitter);

        if let Some(state) = state {
            orchestrator = orchestrator.with_state_manager(state);
        }

        let (command_tx, command_rx) = mpsc::channel(16);
        orchestrator = orchestrator.with_command_channel(command_rx);

        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Pending);
        orchestrator = orchestrator.with_status_watch(status_tx);

        let execution_id = orchestrator.execution_id().to_string();
        let join = tokio::spawn(async move {
            let result = orchestrator.run().await;
            (result, orchestrator.snapshot())
        });

        Ok(ExecutionHandle {
            execution_id,
            join,
            events,
            commands: command_tx,
            status: status_rx,
        })
    }
}

/// Handle to a spawned execution.
pub struct ExecutionHandle {
    pub execution_id: String,
    join: tokio::task::JoinHandle<(EngineResult<HashMap<String, Value>>, ExecutionSnapshot)>,
    events: Option<mpsc::Receiver<ExecutionEvent>>,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ExecutionStatus>,
}

impl ExecutionHandle {
    /// Take the event stream (once).
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ExecutionEvent>> {
        self.events.take()
    }

    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.borrow()
    }

    pub async fn abort(&self, reason: Option<String>) {
        let _ = self.commands.send(Command::Abort { reason }).await;
    }

    /// Await the terminal result.
    pub async fn wait(self) -> EngineResult<HashMap<String, Value>> {
        self.wait_with_snapshot().await.0
    }

    /// Await the terminal result together with the final execution record.
    pub async fn wait_with_snapshot(
        self,
    ) -> (EngineResult<HashMap<String, Value>>, ExecutionSnapshot) {
        match self.join.await {
            Ok((result, snapshot)) => (result, snapshot),
            Err(e) => {
                let err = EngineError::Internal(format!("orchestrator task panicked: {}", e));
                (
                    Err(err),
                    ExecutionSnapshot {
                        version: crate::core::state::SNAPSHOT_VERSION,
                        execution_id: String::new(),
                        diagram_id: String::new(),
                        status: ExecutionStatus::Failed,
                        started_at: 0,
                        ended_at: None,
                        error: Some("orchestrator task panicked".to_string()),
                        node_states: HashMap::new(),
                        node_outputs: HashMap::new(),
                        branch_decisions: HashMap::new(),
                        variables: HashMap::new(),
                        executed_nodes: Vec::new(),
                        exec_counts: HashMap::new(),
                    },
                )
            }
        }
    }
}
