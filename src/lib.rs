//! Distributed Arithmetic Evaluator Library
//!
//! This library crate holds everything behind the two binaries: the
//! orchestrator (`main.rs`) and the compute agent (`bin/agent.rs`).
//!
//! ## Architecture Modules
//! - **`compiler`**: turns an infix expression into a graph of binary operations.
//!   Pure functions only: tokenizer, shunting-yard converter, graph planner.
//! - **`scheduler`**: the durable side. Persists expressions and tasks, hands ready
//!   tasks to workers with an atomic claim, and finalizes an expression once its
//!   graph has settled. Also serves the worker protocol over HTTP.
//! - **`agent`**: the worker pool that pulls tasks, applies operators with a
//!   simulated cost and reports results.
//! - **`config`**: flag and environment configuration of both binaries.

pub mod agent;
pub mod compiler;
pub mod config;
pub mod scheduler;
