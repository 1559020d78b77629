//! Public entry points for running diagrams.

pub mod runner;

pub use runner::{ExecutionHandle, ExecutionRunner, ExecutionRunnerBuilder};
