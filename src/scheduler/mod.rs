//! Task Scheduler Module
//!
//! Durable state and dispatch for expression evaluation. Every expression is
//! compiled into a graph of binary tasks; workers pull ready tasks one at a time
//! and push results back, and the expression is finalized once its graph settles.
//!
//! ## Architecture Overview
//! 1. **Submission**: `Scheduler::build_graph` compiles the text and persists one
//!    `Wait` task per operator, all in one write.
//! 2. **Claiming**: a task is ready when every task it references is `Done`. A
//!    claim is a conditional `Wait -> InProcess` transition, so no task is ever
//!    handed to two workers.
//! 3. **Completion**: each recorded result runs the completion cascade, which
//!    finalizes the expression from its sink task (or the first failure).
//!
//! There is no lease: a worker that dies holding a task leaves it `InProcess`.
//!
//! ## Submodules
//! - **`repository`**: the `TaskRepository` contract and its error type.
//! - **`memory`** / **`sqlite`**: the two implementations of that contract.
//! - **`service`**: the `Scheduler` and the cascade rule.
//! - **`protocol`** / **`handlers`**: the HTTP surface for workers and API clients.

pub mod handlers;
pub mod memory;
pub mod protocol;
pub mod repository;
pub mod service;
pub mod sqlite;
pub mod types;
