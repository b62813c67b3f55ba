// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Filter translation
//!
//! A textual filter becomes a query-DSL clause that the engine AND-combines
//! with its own time-range clause. Empty input means "match everything" and
//! translates to `None`.
//!
//! Two translators are provided:
//!
//! - [`ExpressionParser`]: local parser for expressions such as
//!   `type == "page-view" AND (metadata.status != 'ok' OR EXISTS profile.id)`
//! - [`SqlTranslator`]: hands a SQL `WHERE` clause to the engine's SQL
//!   translate endpoint
//!
//! ## Expression grammar
//!
//! ```text
//! expr    := and ("OR" and)*
//! and     := unary ("AND" unary)*
//! unary   := "NOT" unary | primary
//! primary := "(" expr ")" | "EXISTS" field | field "EXISTS" | field op value
//! op      := "==" | "=" | "!=" | ">" | ">=" | "<" | "<="
//! value   := quoted string | number | true | false | null | bare word
//! ```
//!
//! Keywords are case-insensitive.

use async_trait::async_trait;
use cdp_core::{CdpError, Result};
use cdp_storage::{LogicalIndex, PersistenceService};
use serde_json::{json, Number, Value};

/// Translates a textual filter into a query clause
#[async_trait]
pub trait FilterTranslator: Send + Sync {
    /// `Ok(None)` for empty input; `CdpError::FilterSyntax` for malformed input
    async fn translate(&self, filter: Option<&str>) -> Result<Option<Value>>;
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Exists(String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Query-DSL clause for this predicate
    pub fn to_dsl(&self) -> Value {
        match self {
            Predicate::Compare { field, op, value } => match (op, value) {
                (CompareOp::Eq, Value::Null) => {
                    json!({"bool": {"must_not": [{"exists": {"field": field}}]}})
                }
                (CompareOp::Ne, Value::Null) => json!({"exists": {"field": field}}),
                (CompareOp::Eq, _) => json!({"term": {field: value}}),
                (CompareOp::Ne, _) => json!({"bool": {"must_not": [{"term": {field: value}}]}}),
                (CompareOp::Gt, _) => json!({"range": {field: {"gt": value}}}),
                (CompareOp::Gte, _) => json!({"range": {field: {"gte": value}}}),
                (CompareOp::Lt, _) => json!({"range": {field: {"lt": value}}}),
                (CompareOp::Lte, _) => json!({"range": {field: {"lte": value}}}),
            },
            Predicate::Exists(field) => json!({"exists": {"field": field}}),
            Predicate::Not(inner) => json!({"bool": {"must_not": [inner.to_dsl()]}}),
            Predicate::And(items) => {
                let must: Vec<Value> = items.iter().map(Predicate::to_dsl).collect();
                json!({"bool": {"must": must}})
            }
            Predicate::Or(items) => {
                let should: Vec<Value> = items.iter().map(Predicate::to_dsl).collect();
                json!({"bool": {"should": should, "minimum_should_match": 1}})
            }
        }
    }
}

/// Deepest nesting of `(` and `NOT` accepted in one filter
pub const MAX_DEPTH: usize = 128;

fn syntax(message: impl Into<String>, position: usize) -> CdpError {
    CdpError::FilterSyntax {
        message: message.into(),
        position,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Op(CompareOp),
    /// Quoted string
    Str(String),
    Word(String),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !"()=!<>\"'".contains(c)
}

fn tokenize(text: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '=' | '!' | '<' | '>' => {
                let (op, len) = match (c, next) {
                    ('=', Some('=')) => (CompareOp::Eq, 2),
                    ('=', _) => (CompareOp::Eq, 1),
                    ('!', Some('=')) => (CompareOp::Ne, 2),
                    ('<', Some('=')) => (CompareOp::Lte, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    ('>', Some('=')) => (CompareOp::Gte, 2),
                    ('>', _) => (CompareOp::Gt, 1),
                    _ => return Err(syntax("unexpected '!'", pos)),
                };
                i += len;
                Token::Op(op)
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax("unterminated string", pos)),
                        Some(&(_, '\\')) => {
                            if let Some(&(_, escaped)) = chars.get(i + 1) {
                                value.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&(_, ch)) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&(_, ch)) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                Token::Str(value)
            }
            _ => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i].1) {
                    i += 1;
                }
                Token::Word(chars[start..i].iter().map(|&(_, c)| c).collect())
            }
        };
        tokens.push(Spanned { token, pos });
    }
    Ok(tokens)
}

/// Typed value of an unquoted word
fn literal(word: &str) -> Value {
    match word {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = word.parse::<i64>() {
        return json!(n);
    }
    word.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(word.to_string()))
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.index).map_or(self.end, |s| s.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|s| s.token.clone());
        self.index += 1;
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn descend(&mut self, pos: usize) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(syntax("filter nested too deeply", pos));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut items = vec![self.parse_and()?];
        while self.at_keyword("OR") {
            self.index += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut items = vec![self.parse_unary()?];
        while self.at_keyword("AND") {
            self.index += 1;
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::And(items)
        })
    }

    fn parse_unary(&mut self) -> Result<Predicate> {
        if self.at_keyword("NOT") {
            self.descend(self.position())?;
            self.index += 1;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        let pos = self.position();
        match self.next() {
            Some(Token::LParen) => {
                self.descend(pos)?;
                let inner = self.parse_or()?;
                let close = self.position();
                match self.next() {
                    Some(Token::RParen) => {
                        self.depth -= 1;
                        Ok(inner)
                    }
                    _ => Err(syntax("expected ')'", close)),
                }
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("EXISTS") => {
                let field_pos = self.position();
                match self.next() {
                    Some(Token::Word(field)) => Ok(Predicate::Exists(field)),
                    _ => Err(syntax("expected field after EXISTS", field_pos)),
                }
            }
            Some(Token::Word(field)) => {
                if self.at_keyword("EXISTS") {
                    self.index += 1;
                    return Ok(Predicate::Exists(field));
                }
                let op_pos = self.position();
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    _ => return Err(syntax(format!("expected operator after '{field}'"), op_pos)),
                };
                let value_pos = self.position();
                let value = match self.next() {
                    Some(Token::Str(s)) => Value::String(s),
                    Some(Token::Word(w)) => literal(&w),
                    _ => return Err(syntax("expected value", value_pos)),
                };
                Ok(Predicate::Compare { field, op, value })
            }
            Some(_) => Err(syntax("expected field or '('", pos)),
            None => Err(syntax("unexpected end of filter", pos)),
        }
    }
}

/// Parse a filter expression; `None` for blank input
pub fn parse_filter(text: &str) -> Result<Option<Predicate>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut parser = Parser {
        tokens: tokenize(text)?,
        index: 0,
        end: text.len(),
        depth: 0,
    };
    let predicate = parser.parse_or()?;
    if parser.index < parser.tokens.len() {
        return Err(syntax("unexpected token", parser.position()));
    }
    Ok(Some(predicate))
}

/// Local expression-language translator
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionParser;

#[async_trait]
impl FilterTranslator for ExpressionParser {
    async fn translate(&self, filter: Option<&str>) -> Result<Option<Value>> {
        Ok(parse_filter(filter.unwrap_or_default())?.map(|p| p.to_dsl()))
    }
}

/// SQL `WHERE` clause translator backed by the engine
pub struct SqlTranslator {
    storage: PersistenceService,
    index: LogicalIndex,
}

impl SqlTranslator {
    pub fn new(storage: PersistenceService, index: LogicalIndex) -> Self {
        Self { storage, index }
    }

    /// Full statement sent for translation
    pub fn statement(&self, filter: &str) -> String {
        let alias = self.storage.resolver().resolve_alias(self.index);
        format!("SELECT * FROM \"{alias}\" WHERE {filter}")
    }
}

#[async_trait]
impl FilterTranslator for SqlTranslator {
    async fn translate(&self, filter: Option<&str>) -> Result<Option<Value>> {
        let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
            return Ok(None);
        };
        let body = match self.storage.translate_sql(&self.statement(filter)).await {
            Ok(body) => body,
            // the engine rejects malformed SQL with a 400
            Err(CdpError::Storage { message, details }) if details["status"] == 400 => {
                return Err(syntax(message, 0));
            }
            Err(e) => return Err(e),
        };
        Ok(Some(body.get("query").cloned().unwrap_or_else(|| json!({"match_all": {}}))))
    }
}
