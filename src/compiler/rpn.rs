use super::types::{CompileError, Token};

/// Reorders validated infix tokens into postfix form (shunting-yard).
///
/// Parentheses never reach the output. Unbalanced brackets at this point mean
/// the tokenizer let something through, and surface as `InvalidInput`.
pub fn to_postfix(tokens: &[Token]) -> Result<Vec<Token>, CompileError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();

    for token in tokens {
        match token {
            Token::Number(_) => output.push(*token),
            Token::LeftParen => stack.push(*token),
            Token::RightParen => loop {
                match stack.pop() {
                    Some(Token::LeftParen) => break,
                    Some(op @ Token::Op(_)) => output.push(op),
                    _ => return Err(CompileError::InvalidInput),
                }
            },
            Token::Op(current) => {
                while let Some(Token::Op(top)) = stack.last() {
                    if top.precedence() < current.precedence() {
                        break;
                    }
                    output.push(Token::Op(*top));
                    stack.pop();
                }
                stack.push(*token);
            }
        }
    }

    while let Some(token) = stack.pop() {
        match token {
            Token::Op(_) => output.push(token),
            _ => return Err(CompileError::InvalidInput),
        }
    }

    Ok(output)
}
