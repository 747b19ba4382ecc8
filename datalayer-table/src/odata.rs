//! Parser and evaluator for table filter strings, used by the in-process service.
//!
//! Supports the subset of the OData `$filter` grammar that table services accept:
//! comparisons (`eq`, `ne`, `gt`, `ge`, `lt`, `le`) between a property and a literal,
//! `and`, `or`, `not`, parentheses and the `true`/`false` constants. Literals are quoted
//! strings (`''` escapes a quote), integers (`L` suffix for 64-bit), doubles, booleans,
//! `datetime'...'` and `guid'...'`.

use bson::{Binary, Bson, spec::BinarySubtype};
use std::{cmp::Ordering, iter::Peekable, str::CharIndices};

use datalayer_core::value::Comparable;

use crate::service::{TableEntity, TableError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "eq" => CompareOp::Eq,
            "ne" => CompareOp::Ne,
            "gt" => CompareOp::Gt,
            "ge" => CompareOp::Ge,
            "lt" => CompareOp::Lt,
            "le" => CompareOp::Le,
            _ => return None,
        })
    }
}

/// A parsed filter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Constant(bool),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Compare {
        property: String,
        op: CompareOp,
        value: Bson,
    },
}

impl Node {
    /// Evaluates the filter against an entity. Comparisons on absent properties are false.
    pub fn matches(&self, entity: &TableEntity) -> bool {
        match self {
            Node::Constant(value) => *value,
            Node::And(left, right) => left.matches(entity) && right.matches(entity),
            Node::Or(left, right) => left.matches(entity) || right.matches(entity),
            Node::Not(inner) => !inner.matches(entity),
            Node::Compare { property, op, value } => {
                let Some(actual) = property_value(entity, property) else {
                    return false;
                };
                let left = Comparable::from(&actual);
                let right = Comparable::from(value);

                match op {
                    CompareOp::Eq => left == right,
                    CompareOp::Ne => left != right,
                    CompareOp::Gt => left.partial_cmp(&right) == Some(Ordering::Greater),
                    CompareOp::Ge => matches!(left.partial_cmp(&right), Some(Ordering::Greater | Ordering::Equal)),
                    CompareOp::Lt => left.partial_cmp(&right) == Some(Ordering::Less),
                    CompareOp::Le => matches!(left.partial_cmp(&right), Some(Ordering::Less | Ordering::Equal)),
                }
            }
        }
    }
}

fn property_value(entity: &TableEntity, property: &str) -> Option<Bson> {
    match property {
        "PartitionKey" => Some(Bson::String(entity.partition_key.clone())),
        "RowKey" => Some(Bson::String(entity.row_key.clone())),
        "Timestamp" => entity
            .timestamp
            .map(|timestamp| Bson::DateTime(bson::DateTime::from_chrono(timestamp))),
        _ => entity.properties.get(property).cloned(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Word(String),
    Literal(Bson),
}

/// Parses a filter string.
pub(crate) fn parse(input: &str) -> Result<Node, TableError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { input, tokens, position: 0 };

    let node = parser.or()?;
    match parser.peek() {
        None => Ok(node),
        Some(token) => Err(parser.error(format!("unexpected {token:?}"))),
    }
}

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> TableError {
        TableError::InvalidInput(format!("filter {:?}: {message}", self.input))
    }

    fn tokenize(mut self) -> Result<Vec<Token>, TableError> {
        let mut tokens = Vec::new();

        while let Some(&(start, c)) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '(' => {
                    self.chars.next();
                    tokens.push(Token::Open);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::Close);
                }
                '\'' => {
                    let text = self.quoted()?;
                    tokens.push(Token::Literal(Bson::String(text)));
                }
                c if c.is_ascii_digit() || c == '-' => tokens.push(self.number(start)?),
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let word = self.word(start);

                    if matches!(self.chars.peek(), Some((_, '\''))) {
                        let text = self.quoted()?;
                        tokens.push(Token::Literal(self.typed(&word, &text)?));
                    } else {
                        tokens.push(Token::Word(word));
                    }
                }
                other => return Err(self.error(format!("unexpected character {other:?}"))),
            }
        }

        Ok(tokens)
    }

    fn word(&mut self, start: usize) -> String {
        let mut end = start;
        while let Some(&(index, c)) = self.chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            end = index + c.len_utf8();
            self.chars.next();
        }

        self.input[start..end].to_string()
    }

    fn quoted(&mut self) -> Result<String, TableError> {
        self.chars.next();
        let mut text = String::new();

        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    if matches!(self.chars.peek(), Some((_, '\''))) {
                        self.chars.next();
                        text.push('\'');
                    } else {
                        return Ok(text);
                    }
                }
                Some((_, c)) => text.push(c),
                None => return Err(self.error("unterminated string literal")),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<Token, TableError> {
        let mut end = start;
        let mut is_double = false;
        let mut is_long = false;

        while let Some(&(index, c)) = self.chars.peek() {
            match c {
                '0'..='9' | '-' | '+' => {}
                '.' | 'e' | 'E' => is_double = true,
                'L' => {
                    is_long = true;
                    self.chars.next();
                    break;
                }
                _ => break,
            }
            end = index + 1;
            self.chars.next();
        }

        let text = &self.input[start..end];
        let value = if is_double {
            text.parse::<f64>().map(Bson::Double).ok()
        } else if is_long {
            text.parse::<i64>().map(Bson::Int64).ok()
        } else {
            text.parse::<i32>()
                .map(Bson::Int32)
                .or_else(|_| text.parse::<i64>().map(Bson::Int64))
                .ok()
        };

        value
            .map(Token::Literal)
            .ok_or_else(|| self.error(format!("malformed number {text:?}")))
    }

    fn typed(&self, prefix: &str, text: &str) -> Result<Bson, TableError> {
        match prefix {
            "datetime" => chrono::DateTime::parse_from_rfc3339(text)
                .map(|instant| Bson::DateTime(bson::DateTime::from_chrono(instant)))
                .map_err(|err| self.error(format!("datetime literal {text:?}: {err}"))),
            "guid" => uuid::Uuid::parse_str(text)
                .map(|guid| {
                    Bson::Binary(Binary {
                        subtype: BinarySubtype::Uuid,
                        bytes: guid.as_bytes().to_vec(),
                    })
                })
                .map_err(|err| self.error(format!("guid literal {text:?}: {err}"))),
            other => Err(self.error(format!("unknown literal type {other:?}"))),
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl std::fmt::Display) -> TableError {
        TableError::InvalidInput(format!("filter {:?}: {message}", self.input))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(word)) if word == keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Node, TableError> {
        let mut node = self.and()?;
        while self.keyword("or") {
            node = Node::Or(Box::new(node), Box::new(self.and()?));
        }

        Ok(node)
    }

    fn and(&mut self) -> Result<Node, TableError> {
        let mut node = self.unary()?;
        while self.keyword("and") {
            node = Node::And(Box::new(node), Box::new(self.unary()?));
        }

        Ok(node)
    }

    fn unary(&mut self) -> Result<Node, TableError> {
        if self.keyword("not") {
            return Ok(Node::Not(Box::new(self.unary()?)));
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<Node, TableError> {
        match self.next() {
            Some(Token::Open) => {
                let node = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(node),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Word(word)) if word == "true" => Ok(Node::Constant(true)),
            Some(Token::Word(word)) if word == "false" => Ok(Node::Constant(false)),
            Some(Token::Word(property)) => {
                let op = match self.next() {
                    Some(Token::Word(word)) => CompareOp::parse(&word)
                        .ok_or_else(|| self.error(format!("unknown operator {word:?}")))?,
                    _ => return Err(self.error(format!("expected an operator after {property}"))),
                };
                let value = match self.next() {
                    Some(Token::Literal(value)) => value,
                    Some(Token::Word(word)) if word == "true" => Bson::Boolean(true),
                    Some(Token::Word(word)) if word == "false" => Bson::Boolean(false),
                    _ => return Err(self.error(format!("expected a literal after {property}"))),
                };

                Ok(Node::Compare { property, op, value })
            }
            Some(token) => Err(self.error(format!("unexpected {token:?}"))),
            None => Err(self.error("unexpected end of filter")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn entity() -> TableEntity {
        TableEntity::new(
            "people",
            "7",
            doc! { "id": 7_i64, "name": "O'Brien", "age": 41, "score": 2.5, "active": true },
        )
    }

    fn eval(filter: &str) -> bool {
        parse(filter).unwrap().matches(&entity())
    }

    #[test]
    fn comparisons_and_literals() {
        assert!(eval("id eq 7L"));
        assert!(eval("age gt 40 and age le 41"));
        assert!(eval("name eq 'O''Brien'"));
        assert!(eval("score ge 2.5"));
        assert!(eval("active eq true"));
        assert!(eval("PartitionKey eq 'people' and RowKey eq '7'"));
    }

    #[test]
    fn precedence_and_grouping() {
        assert!(eval("age lt 10 or age gt 40 and active eq true"));
        assert!(!eval("(age lt 10 or age gt 40) and active eq false"));
        assert!(eval("not (age lt 10)"));
        assert!(!eval("false"));
    }

    #[test]
    fn absent_properties_never_match() {
        assert!(!eval("nickname eq 'x'"));
        assert!(!eval("nickname ne 'x'"));
    }

    #[test]
    fn malformed_filters_are_invalid_input() {
        for filter in ["age gt", "age between 1", "(age gt 1", "name eq 'open", "age gt 1 1"] {
            assert!(matches!(parse(filter), Err(TableError::InvalidInput(_))), "{filter}");
        }
    }
}
