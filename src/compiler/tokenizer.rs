//! Lexing and structural validation of raw expression text.
//!
//! A single left-to-right scan produces the tokens, then four structural checks
//! run in a fixed order; the first one violated decides the error. The last step
//! inserts the implicit `*` of `2(3+4)` and `(2)(3)`.

use super::types::{CompileError, Operator, Token};

/// Tokenizes and validates an expression.
///
/// An empty token stream is returned as-is; rejecting it is left to
/// [`compile`](super::compile) so that `EmptyExpression` is reported only after
/// every character has been accepted.
pub fn tokenize(expression: &str) -> Result<Vec<Token>, CompileError> {
    let tokens = scan(expression)?;

    if !check_empty_brackets(&tokens) {
        return Err(CompileError::EmptyBrackets);
    }
    if !check_bracket_balance(&tokens) {
        return Err(CompileError::UnclosedBracket);
    }
    if !check_missing_operand(&tokens) {
        return Err(CompileError::MissingOperand);
    }
    if !check_adjacent_operators(&tokens) {
        return Err(CompileError::InvalidInput);
    }

    Ok(insert_implicit_multiplication(tokens))
}

fn scan(expression: &str) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let mut digits = String::new();

    for symbol in expression.chars() {
        if symbol.is_ascii_digit() {
            digits.push(symbol);
            continue;
        }

        flush_number(&mut digits, &mut tokens)?;

        if symbol.is_whitespace() {
            continue;
        }

        let token = match symbol {
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            other => match Operator::from_symbol(other) {
                Some(op) => Token::Op(op),
                None => return Err(CompileError::InvalidCharacter),
            },
        };
        tokens.push(token);
    }

    flush_number(&mut digits, &mut tokens)?;

    Ok(tokens)
}

fn flush_number(digits: &mut String, tokens: &mut Vec<Token>) -> Result<(), CompileError> {
    if digits.is_empty() {
        return Ok(());
    }
    let value: f64 = digits.parse().map_err(|_| CompileError::InvalidInput)?;
    if !value.is_finite() {
        return Err(CompileError::NumberOutOfRange);
    }
    tokens.push(Token::Number(value));
    digits.clear();
    Ok(())
}

/// `()` anywhere in the stream.
fn check_empty_brackets(tokens: &[Token]) -> bool {
    !tokens
        .windows(2)
        .any(|pair| pair[0] == Token::LeftParen && pair[1] == Token::RightParen)
}

fn check_bracket_balance(tokens: &[Token]) -> bool {
    let mut depth: i64 = 0;

    for token in tokens {
        match token {
            Token::LeftParen => depth += 1,
            Token::RightParen => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }

    depth == 0
}

/// The stream may not end on an operator (other than `)`), and two numbers may
/// never touch.
fn check_missing_operand(tokens: &[Token]) -> bool {
    if let Some(last) = tokens.last() {
        if !last.is_number() && *last != Token::RightParen {
            return false;
        }
    }

    !tokens
        .windows(2)
        .any(|pair| pair[0].is_number() && pair[1].is_number())
}

/// Two adjacent non-numeric tokens are only allowed when the first one closes a
/// group or the second one opens one.
fn check_adjacent_operators(tokens: &[Token]) -> bool {
    tokens.windows(2).all(|pair| {
        let (current, next) = (pair[0], pair[1]);
        current.is_number()
            || next.is_number()
            || current == Token::RightParen
            || next == Token::LeftParen
    })
}

fn insert_implicit_multiplication(tokens: Vec<Token>) -> Vec<Token> {
    let mut result = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        result.push(*token);

        if let Some(next) = tokens.get(i + 1) {
            let closes_value = token.is_number() || *token == Token::RightParen;
            if closes_value && *next == Token::LeftParen {
                result.push(Token::Op(Operator::Multiply));
            }
            if *token == Token::RightParen && next.is_number() {
                result.push(Token::Op(Operator::Multiply));
            }
        }
    }

    result
}
