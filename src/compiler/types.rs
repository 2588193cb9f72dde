use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the four binary operations a task can carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
}

impl Operator {
    pub fn symbol(&self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Subtract => '-',
            Operator::Multiply => '*',
            Operator::Divide => '/',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Subtract),
            '*' => Some(Operator::Multiply),
            '/' => Some(Operator::Divide),
            _ => None,
        }
    }

    /// Binding strength used by the shunting-yard pass.
    pub fn precedence(&self) -> u8 {
        match self {
            Operator::Add | Operator::Subtract => 1,
            Operator::Multiply | Operator::Divide => 2,
        }
    }

    /// Computes `lhs <op> rhs`.
    ///
    /// Domain errors (division by zero, a result that does not fit in a
    /// finite `f64`) are reported to the scheduler as task failures rather
    /// than transport faults.
    pub fn apply(&self, lhs: f64, rhs: f64) -> Result<f64, ArithmeticError> {
        let value = match self {
            Operator::Add => lhs + rhs,
            Operator::Subtract => lhs - rhs,
            Operator::Multiply => lhs * rhs,
            Operator::Divide => {
                if rhs == 0.0 {
                    return Err(ArithmeticError::DivisionByZero);
                }
                lhs / rhs
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(ArithmeticError::OutOfRange)
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Operator {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(symbol), None) => Operator::from_symbol(symbol).ok_or(CompileError::InvalidInput),
            _ => Err(CompileError::InvalidInput),
        }
    }
}

/// A lexical unit of an expression.
///
/// Numbers are kept as parsed values; the tokenizer only ever produces
/// non-negative integers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Number(f64),
    Op(Operator),
    LeftParen,
    RightParen,
}

impl Token {
    pub fn is_number(&self) -> bool {
        matches!(self, Token::Number(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(value) => write!(f, "{}", value),
            Token::Op(op) => write!(f, "{}", op),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
        }
    }
}

/// Failures detected before any task row is written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("invalid characters in expression")]
    InvalidCharacter,

    #[error("the brackets are empty")]
    EmptyBrackets,

    #[error("the brackets in the expression are not consistent")]
    UnclosedBracket,

    #[error("missing operand")]
    MissingOperand,

    #[error("expression is not valid")]
    InvalidInput,

    #[error("expression is empty")]
    EmptyExpression,

    #[error("number is out of range")]
    NumberOutOfRange,

    #[error("not enough operands for operation {0}")]
    NotEnoughOperands(Operator),
}

/// Errors raised while executing an operation on a worker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("result out of range")]
    OutOfRange,
}
