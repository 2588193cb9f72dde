//! Compute Agent Module
//!
//! The worker side of the system: a pool of loops that pull tasks from the
//! orchestrator, evaluate one binary operation each and report the outcome.
//!
//! ## Submodules
//! - **`compute`**: validating a task and applying its operator with a simulated cost.
//! - **`client`**: the `Coordinator` seam, over HTTP or in-process.
//! - **`pool`**: the `WorkerPool` and its iteration cycle.

pub mod client;
pub mod compute;
pub mod pool;

#[cfg(test)]
mod tests;
