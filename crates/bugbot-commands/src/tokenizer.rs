//! Splits command usage patterns into literal and parameter tokens.

use thiserror::Error;

const PARAMETER_OPEN: char = '<';
const PARAMETER_CLOSE: char = '>';

/// Raised when a usage pattern cannot be tokenized at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("unbalanced parameter delimiters in '{word}'")]
    UnbalancedDelimiters { word: String },
    #[error("empty parameter name in '{word}'")]
    EmptyParameterName { word: String },
}

/// One unit of a tokenized pattern: a literal word or a named parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub word: String,
    pub is_parameter: bool,
}

impl Token {
    fn literal(word: &str) -> Self {
        Self {
            word: word.to_string(),
            is_parameter: false,
        }
    }

    fn parameter(name: &str) -> Self {
        Self {
            word: name.to_string(),
            is_parameter: true,
        }
    }
}

/// Tokenizes a usage pattern, splitting on single spaces.
///
/// A word wrapped in `<` and `>` becomes a parameter token named after the
/// inner text; every other word is a literal. Delimiters cannot be escaped;
/// a word with one delimiter but not the other is a configuration error.
/// Pure: identical input always yields the identical token sequence.
pub fn tokenize(pattern: &str) -> Result<Vec<Token>, PatternError> {
    pattern.split(' ').map(classify_word).collect()
}

fn classify_word(word: &str) -> Result<Token, PatternError> {
    let opens = word.starts_with(PARAMETER_OPEN);
    let closes = word.ends_with(PARAMETER_CLOSE) && word.len() > 1;
    match (opens, closes) {
        (true, true) => {
            let name = &word[1..word.len() - 1];
            if name.is_empty() {
                return Err(PatternError::EmptyParameterName {
                    word: word.to_string(),
                });
            }
            Ok(Token::parameter(name))
        }
        (false, false) => Ok(Token::literal(word)),
        _ => Err(PatternError::UnbalancedDelimiters {
            word: word.to_string(),
        }),
    }
}
