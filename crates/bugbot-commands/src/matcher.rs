//! Lock-step matching of tokenized patterns against raw message text.

use std::collections::HashMap;

use crate::tokenizer::Token;

/// Parameter name to extracted value mapping produced by a successful match.
pub type Parameters = HashMap<String, String>;

/// Matches `text` against a tokenized pattern.
///
/// The text is split on single spaces and walked in lock-step with the
/// tokens: a literal token must equal its word exactly (case-sensitive); a
/// parameter token in final position greedily binds the remaining words
/// joined back with single spaces (possibly the empty string when no words
/// remain); a non-trailing parameter binds exactly one word. Leftover words
/// with no trailing parameter to absorb them mean no match. Deterministic:
/// no randomness and no locale-dependent comparison.
pub fn match_text(tokens: &[Token], text: &str) -> Option<Parameters> {
    let words = text.split(' ').collect::<Vec<_>>();
    let mut parameters = Parameters::new();
    let mut cursor = 0_usize;

    for (index, token) in tokens.iter().enumerate() {
        let is_trailing = index + 1 == tokens.len();
        if token.is_parameter && is_trailing {
            let remainder = if cursor < words.len() {
                words[cursor..].join(" ")
            } else {
                String::new()
            };
            parameters.insert(token.word.clone(), remainder);
            cursor = words.len();
            continue;
        }

        let word = words.get(cursor)?;
        if token.is_parameter {
            parameters.insert(token.word.clone(), (*word).to_string());
        } else if *word != token.word {
            return None;
        }
        cursor = cursor.saturating_add(1);
    }

    if cursor < words.len() {
        return None;
    }
    Some(parameters)
}
