//! Glob patterns over object types.
//!
//! Types are split into segments by `.`, `/` and `#`. In a pattern `*`
//! matches any run within one segment, `**` matches any run across segments,
//! and `?` matches a single non-separator character. Everything else is
//! literal.

use std::fmt;

use crate::error::ExchangeError;

const SEPARATORS: [char; 3] = ['.', '/', '#'];

fn is_separator(c: char) -> bool {
    SEPARATORS.contains(&c)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    Segment,
    Anything,
}

/// A compiled object type pattern.
#[derive(Clone, PartialEq, Eq)]
pub struct TypePattern {
    source: String,
    tokens: Vec<Token>,
}

impl TypePattern {
    pub fn new(pattern: &str) -> Result<Self, ExchangeError> {
        if pattern.is_empty() {
            return Err(ExchangeError::InvalidPattern(pattern.to_string()));
        }
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    // Runs of stars collapse into one `**`.
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    tokens.push(Token::Anything);
                }
                '*' => tokens.push(Token::Segment),
                '?' => tokens.push(Token::AnyChar),
                other => tokens.push(Token::Literal(other)),
            }
        }
        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `object_type` matches the pattern.
    pub fn matches(&self, object_type: &str) -> bool {
        let text: Vec<char> = object_type.chars().collect();
        // reachable[j]: the tokens consumed so far can match text[..j].
        let mut reachable = vec![false; text.len() + 1];
        reachable[0] = true;

        for token in &self.tokens {
            let mut next = vec![false; text.len() + 1];
            match token {
                Token::Literal(c) => {
                    for j in 0..text.len() {
                        if reachable[j] && text[j] == *c {
                            next[j + 1] = true;
                        }
                    }
                }
                Token::AnyChar => {
                    for j in 0..text.len() {
                        if reachable[j] && !is_separator(text[j]) {
                            next[j + 1] = true;
                        }
                    }
                }
                Token::Segment => {
                    for j in 0..=text.len() {
                        if !reachable[j] {
                            continue;
                        }
                        next[j] = true;
                        let mut k = j;
                        while k < text.len() && !is_separator(text[k]) {
                            k += 1;
                            next[k] = true;
                        }
                    }
                }
                Token::Anything => {
                    if let Some(first) = reachable.iter().position(|r| *r) {
                        for slot in next.iter_mut().skip(first) {
                            *slot = true;
                        }
                    }
                }
            }
            reachable = next;
        }
        reachable[text.len()]
    }
}

impl fmt::Debug for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypePattern({:?})", self.source)
    }
}

impl fmt::Display for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
