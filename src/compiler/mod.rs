//! Expression Compiler
//!
//! Turns infix arithmetic text into a dependency graph of binary operations.
//!
//! ## Pipeline
//! 1. **`tokenizer`**: lexes the text and runs the structural checks
//!    (`EmptyBrackets`, `UnclosedBracket`, `MissingOperand`, `InvalidInput`).
//! 2. **`rpn`**: reorders the tokens into postfix form by operator precedence.
//! 3. **`graph`**: evaluates the postfix stream symbolically, emitting one planned
//!    task per operator.
//!
//! Every stage is a pure function; persisting the plan is the scheduler's job.

pub mod graph;
pub mod rpn;
pub mod tokenizer;
pub mod types;


use graph::TaskGraph;
use types::CompileError;

/// Runs the whole pipeline on one expression.
pub fn compile(expression: &str) -> Result<TaskGraph, CompileError> {
    let tokens = tokenizer::tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CompileError::EmptyExpression);
    }

    let postfix = rpn::to_postfix(&tokens)?;
    graph::build_graph(&postfix)
}
