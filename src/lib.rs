//! # diagraph — a diagram-driven workflow execution engine
//!
//! `diagraph` executes diagram-defined multi-agent workflows: directed
//! graphs whose nodes are units of work (model calls, code execution,
//! conditionals, API calls, sub-workflows) and whose edges carry typed data
//! between them. The engine resolves dependencies dynamically, dispatches
//! node logic through a pluggable handler registry, tracks and persists run
//! state, and exposes ordered lifecycle events to observers.
//!
//! - **Dynamic scheduling**: ready batches computed from the graph and the
//!   live completed/failed sets, with conditional branch arming, skip
//!   propagation, and bounded loops through condition nodes.
//! - **Typed message passing**: immutable [`Envelope`]s flow between nodes
//!   through a per-run [`ExecutionContext`]; a side-effect-free resolver
//!   applies edge transforms and declared defaults.
//! - **Pluggable node handlers**: `prepare / run / serialize / on_error /
//!   post_execute` per node type, registered once and validated at diagram
//!   compile time. All I/O goes through injected capability providers.
//! - **Recoverable checkpointing**: versioned snapshots round-trip exactly;
//!   resumed runs never re-execute a completed node.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use diagraph::{DiagramSchema, ExecutionRunner};
//!
//! #[tokio::main]
//! async fn main() {
//!     let text = std::fs::read_to_string("diagram.json").unwrap();
//!     let schema: DiagramSchema = serde_json::from_str(&text).unwrap();
//!     let handle = ExecutionRunner::builder(schema).start().await.unwrap();
//!     let outputs = handle.wait().await.unwrap();
//!     println!("{:?}", outputs);
//! }
//! ```

pub mod api;
pub mod capability;
pub mod core;
pub mod error;
pub mod graph;
pub mod nodes;
pub mod schema;
pub mod template;

pub use crate::api::{ExecutionHandle, ExecutionRunner, ExecutionRunnerBuilder};
pub use crate::capability::{
    CapabilityError, CapabilityRegistry, ChatMessage, CodeRunner, FileAccess, HttpFetcher,
    HttpRequest, HttpResponse, InteractionChannel, LlmClient, LlmRequest, LlmResponse,
    MemorySelector, SubDiagramRunner,
};
pub use crate::core::{
    Command, ContentType, Envelope, EngineConfig, EventEmitter, ExecutionContext,
    ExecutionEvent, ExecutionSnapshot, ExecutionStatus, ExecutionTracker, FakeIdGenerator,
    FakeTimeProvider, FileStateStore, IdGenerator, MemoryStateStore, NodeState, NodeStatus,
    OrderCalculator, Orchestrator, RealIdGenerator, RealTimeProvider, ResolvedInputs,
    RuntimeContext, StateManager, StateStore, TimeProvider, SNAPSHOT_VERSION,
};
pub use crate::error::{CompileError, EngineError, EngineResult, NodeError, NodeResult};
pub use crate::graph::{compile, CompiledDiagram};
pub use crate::nodes::{HandlerContext, HandlerRegistry, NodeHandler, RunOutput};
pub use crate::schema::DiagramSchema;
