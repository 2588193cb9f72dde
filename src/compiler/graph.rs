//! Task Graph Builder
//!
//! Walks a postfix stream with an evaluation stack and produces the binary
//! operations of one expression as a plan. Nodes reference each other by their
//! position in the plan; the repository maps positions to task ids when it
//! persists the plan, so a failed build never leaves partial rows behind.

use super::types::{CompileError, Operator, Token};

/// An operand inside a plan: a literal, or the value produced by an earlier node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlannedOperand {
    Literal(f64),
    Node(usize),
}

/// A single binary operation waiting to be persisted as a task row.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub left: PlannedOperand,
    pub right: PlannedOperand,
    pub operation: Operator,
}

/// The dependency forest of one expression.
///
/// Nodes are in creation order, so every `PlannedOperand::Node` points to a
/// lower index than the node that holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGraph {
    pub nodes: Vec<PlannedTask>,
    /// Index of the one node nothing else depends on.
    pub sink: usize,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Builds the task plan for a postfix stream.
///
/// A stream without operators (a bare literal) becomes a single identity task
/// `literal + 0`, so every expression has exactly one sink.
pub fn build_graph(postfix: &[Token]) -> Result<TaskGraph, CompileError> {
    let mut nodes: Vec<PlannedTask> = Vec::new();
    let mut stack: Vec<PlannedOperand> = Vec::new();

    for token in postfix {
        match token {
            Token::Number(value) => stack.push(PlannedOperand::Literal(*value)),
            Token::Op(operation) => {
                // Second pop is the left operand, matching source order.
                let (right, left) = match (stack.pop(), stack.pop()) {
                    (Some(right), Some(left)) => (right, left),
                    _ => return Err(CompileError::NotEnoughOperands(*operation)),
                };
                nodes.push(PlannedTask {
                    left,
                    right,
                    operation: *operation,
                });
                stack.push(PlannedOperand::Node(nodes.len() - 1));
            }
            Token::LeftParen | Token::RightParen => return Err(CompileError::InvalidInput),
        }
    }

    match stack.as_slice() {
        [PlannedOperand::Node(sink)] => Ok(TaskGraph { sink: *sink, nodes }),
        [PlannedOperand::Literal(value)] => Ok(TaskGraph {
            nodes: vec![PlannedTask {
                left: PlannedOperand::Literal(*value),
                right: PlannedOperand::Literal(0.0),
                operation: Operator::Add,
            }],
            sink: 0,
        }),
        [] => Err(CompileError::EmptyExpression),
        _ => Err(CompileError::InvalidInput),
    }
}
