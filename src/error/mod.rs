//! Error types for the execution engine.
//!
//! - [`CompileError`] — Errors raised while compiling a diagram, before a run starts.
//! - [`NodeError`] — Errors raised during individual node execution.
//! - [`EngineError`] — Top-level errors for building and driving an execution.

pub mod compile_error;
pub mod engine_error;
pub mod node_error;

pub use compile_error::CompileError;
pub use engine_error::EngineError;
pub use node_error::NodeError;

/// Convenience alias for engine-level results.
pub type EngineResult<T> = Result<T, EngineError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
