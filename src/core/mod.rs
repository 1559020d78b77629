//! Engine internals: envelopes, execution context, input resolution, the
//! dynamic order calculator, tracking, persistence, and the orchestrator.

pub mod context;
pub mod envelope;
pub mod events;
pub mod orchestrator;
pub mod resolver;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod tracker;

pub use context::{ExecutionContext, ExecutionStatus, NodeState, NodeStatus};
pub use envelope::{ContentType, Envelope};
pub use events::{EventEmitter, ExecutionEvent};
pub use orchestrator::{Command, EngineConfig, Orchestrator};
pub use resolver::{resolve_inputs, ResolvedInputs};
pub use crate::capability::CapabilityRegistry;
pub use runtime::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator,
    RealTimeProvider, RuntimeContext, TimeProvider,
};
pub use scheduler::OrderCalculator;
pub use state::{
    ExecutionSnapshot, FileStateStore, MemoryStateStore, StateManager, StateStore,
    SNAPSHOT_VERSION,
};
pub use tracker::{ExecutionTracker, TrackEvent, TrackRecord};
