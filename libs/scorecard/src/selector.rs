//! Label selectors.
//!
//! Implements the Kubernetes set-based selector syntax used to filter
//! tests by their labels:
//!
//! ```text
//! suite=basic
//! suite!=olm,test
//! test in (basic-check-spec-test, olm-bundle-validation-test)
//! !necessity, tier notin (slow)
//! ```
//!
//! Requirements separated by commas are ANDed together. An empty selector
//! matches everything.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// Errors from selector parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("unable to parse requirement: found '{found}', expected: {expected}")]
    Unexpected { found: String, expected: &'static str },

    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid label value {value:?}: {reason}")]
    InvalidValue { value: String, reason: &'static str },

    #[error("for 'in', 'notin' operators, values set can't be empty")]
    EmptySet,

    #[error("for 'gt', 'lt' operators, the value must be an integer: {0:?}")]
    NotAnInteger(String),
}

/// Comparison performed by a single requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
    GreaterThan,
    LessThan,
}

/// One `key op values` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Whether the label set satisfies this requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => {
                value.is_some_and(|v| self.values.contains(v))
            }
            Operator::NotEquals | Operator::NotIn => {
                value.is_none_or(|v| !self.values.contains(v))
            }
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::GreaterThan | Operator::LessThan => {
                let Some(actual) = value.and_then(|v| v.parse::<i64>().ok()) else {
                    return false;
                };
                let Some(bound) = self.values.iter().next().and_then(|v| v.parse::<i64>().ok())
                else {
                    return false;
                };
                if self.operator == Operator::GreaterThan {
                    actual > bound
                } else {
                    actual < bound
                }
            }
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = || self.values.iter().next().map(String::as_str).unwrap_or("");
        let joined = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
            Operator::Equals => write!(f, "{}={}", self.key, first()),
            Operator::NotEquals => write!(f, "{}!={}", self.key, first()),
            Operator::GreaterThan => write!(f, "{}>{}", self.key, first()),
            Operator::LessThan => write!(f, "{}<{}", self.key, first()),
            Operator::In => write!(f, "{} in ({})", self.key, joined()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, joined()),
        }
    }
}

/// A compiled label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector that matches every label set.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parse a selector expression.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse()
    }

    /// Whether the selector has no requirements.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether the label set satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, requirement) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{requirement}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Identifier(String),
    In,
    NotIn,
    Bang,
    Equals,
    DoubleEquals,
    NotEquals,
    GreaterThan,
    LessThan,
    OpenParen,
    CloseParen,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Identifier(s) => s.clone(),
            Token::In => "in".into(),
            Token::NotIn => "notin".into(),
            Token::Bang => "!".into(),
            Token::Equals => "=".into(),
            Token::DoubleEquals => "==".into(),
            Token::NotEquals => "!=".into(),
            Token::GreaterThan => ">".into(),
            Token::LessThan => "<".into(),
            Token::OpenParen => "(".into(),
            Token::CloseParen => ")".into(),
            Token::Comma => ",".into(),
            Token::End => "end of string".into(),
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '=' | '!' | '(' | ')' | ',' | '>' | '<')
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if is_special(c) {
            chars.next();
            let token = match c {
                '=' if chars.peek() == Some(&'=') => {
                    chars.next();
                    Token::DoubleEquals
                }
                '=' => Token::Equals,
                '!' if chars.peek() == Some(&'=') => {
                    chars.next();
                    Token::NotEquals
                }
                '!' => Token::Bang,
                '(' => Token::OpenParen,
                ')' => Token::CloseParen,
                ',' => Token::Comma,
                '>' => Token::GreaterThan,
                _ => Token::LessThan,
            };
            tokens.push(token);
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || is_special(c) {
                break;
            }
            word.push(c);
            chars.next();
        }
        tokens.push(match word.as_str() {
            "in" => Token::In,
            "notin" => Token::NotIn,
            _ => Token::Identifier(word),
        });
    }

    tokens.push(Token::End);
    tokens
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            tokens: tokenize(input),
            position: 0,
        }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::End)
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        let mut requirements = Vec::new();

        if *self.peek() == Token::End {
            return Ok(Selector { requirements });
        }

        loop {
            requirements.push(self.parse_requirement()?);
            match self.next() {
                Token::End => break,
                Token::Comma => match self.peek() {
                    Token::Identifier(_) | Token::Bang => {}
                    other => {
                        return Err(SelectorError::Unexpected {
                            found: other.describe(),
                            expected: "identifier after ','",
                        })
                    }
                },
                other => {
                    return Err(SelectorError::Unexpected {
                        found: other.describe(),
                        expected: "',' or end of string",
                    })
                }
            }
        }

        Ok(Selector { requirements })
    }

    fn parse_requirement(&mut self) -> Result<Requirement, SelectorError> {
        if *self.peek() == Token::Bang {
            self.next();
            let key = self.parse_key()?;
            return Ok(Requirement {
                key,
                operator: Operator::DoesNotExist,
                values: BTreeSet::new(),
            });
        }

        let key = self.parse_key()?;
        if matches!(self.peek(), Token::End | Token::Comma) {
            return Ok(Requirement {
                key,
                operator: Operator::Exists,
                values: BTreeSet::new(),
            });
        }

        let operator = match self.next() {
            Token::Equals | Token::DoubleEquals => Operator::Equals,
            Token::NotEquals => Operator::NotEquals,
            Token::In => Operator::In,
            Token::NotIn => Operator::NotIn,
            Token::GreaterThan => Operator::GreaterThan,
            Token::LessThan => Operator::LessThan,
            other => {
                return Err(SelectorError::Unexpected {
                    found: other.describe(),
                    expected: "one of '=', '==', '!=', 'in', 'notin', '>', '<'",
                })
            }
        };

        let values = match operator {
            Operator::In | Operator::NotIn => self.parse_value_set()?,
            Operator::GreaterThan | Operator::LessThan => {
                let value = self.parse_single_value()?;
                if value.parse::<i64>().is_err() {
                    return Err(SelectorError::NotAnInteger(value));
                }
                BTreeSet::from([value])
            }
            _ => BTreeSet::from([self.parse_single_value()?]),
        };

        Ok(Requirement {
            key,
            operator,
            values,
        })
    }

    fn parse_key(&mut self) -> Result<String, SelectorError> {
        match self.next() {
            Token::Identifier(key) => {
                validate_key(&key)?;
                Ok(key)
            }
            other => Err(SelectorError::Unexpected {
                found: other.describe(),
                expected: "identifier",
            }),
        }
    }

    fn parse_single_value(&mut self) -> Result<String, SelectorError> {
        match self.peek().clone() {
            Token::Identifier(value) => {
                self.next();
                validate_value(&value)?;
                Ok(value)
            }
            // `key=` selects an empty value.
            Token::End | Token::Comma => Ok(String::new()),
            other => Err(SelectorError::Unexpected {
                found: other.describe(),
                expected: "value",
            }),
        }
    }

    fn parse_value_set(&mut self) -> Result<BTreeSet<String>, SelectorError> {
        match self.next() {
            Token::OpenParen => {}
            other => {
                return Err(SelectorError::Unexpected {
                    found: other.describe(),
                    expected: "'('",
                })
            }
        }

        let mut values = BTreeSet::new();
        loop {
            match self.next() {
                Token::Identifier(value) => {
                    validate_value(&value)?;
                    values.insert(value);
                    match self.next() {
                        Token::Comma => continue,
                        Token::CloseParen => break,
                        other => {
                            return Err(SelectorError::Unexpected {
                                found: other.describe(),
                                expected: "',' or ')'",
                            })
                        }
                    }
                }
                Token::CloseParen => break,
                other => {
                    return Err(SelectorError::Unexpected {
                        found: other.describe(),
                        expected: "value or ')'",
                    })
                }
            }
        }

        if values.is_empty() {
            return Err(SelectorError::EmptySet);
        }
        Ok(values)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name part must be non-empty");
    }
    if name.len() > MAX_NAME_LEN {
        return Err("name part must be no more than 63 characters");
    }
    if !name.chars().all(is_name_char) {
        return Err("name part may only contain alphanumerics, '-', '_' or '.'");
    }
    let starts = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends = name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts || !ends {
        return Err("name part must start and end with an alphanumeric character");
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
                return Err(invalid("prefix must be a non-empty DNS subdomain"));
            }
            if !prefix
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'))
            {
                return Err(invalid("prefix must be a lowercase DNS subdomain"));
            }
            name
        }
        None => key,
    };

    validate_name(name).map_err(invalid)
}

fn validate_value(value: &str) -> Result<(), SelectorError> {
    if value.is_empty() {
        return Ok(());
    }
    validate_name(value).map_err(|reason| SelectorError::InvalidValue {
        value: value.to_string(),
        reason,
    })
}
