//! Binding templates and predicate expressions.
//!
//! Protocol nodes reference execution state through two small languages:
//!
//! - **Templates** render JSON values against the bindings: any string of
//!   the form `"$name"` or `"$name.path.to.field"` is replaced by the
//!   bound value; arrays and objects render recursively; `"$$x"` escapes
//!   to the literal `"$x"`.
//! - **Predicates** are pure boolean/value expressions over bindings used
//!   by BRANCH nodes: paths, literals, comparisons, `!`/`not`, `&&`/`and`,
//!   `||`/`or`, and `exists(path)`.

use serde_json::{json, Value};

use crate::entity::JsonMap;
use crate::error::{ChoraError, Result};

/// Looks up a dotted path in the bindings.
///
/// The first segment names a binding; the rest descend object fields and
/// numeric array indexes.
pub fn lookup_path<'a>(bindings: &'a JsonMap, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = bindings.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Renders a template against the bindings.
///
/// # Errors
///
/// An unresolvable `"$path"` reference is an execution error — the
/// protocol names state it never bound.
pub fn resolve_template(template: &Value, bindings: &JsonMap) -> Result<Value> {
    match template {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix("$$") {
                Ok(json!(format!("${}", rest)))
            } else if let Some(path) = s.strip_prefix('$') {
                lookup_path(bindings, path)
                    .cloned()
                    .ok_or_else(|| ChoraError::execution(format!("unresolved binding '{}'", path)))
            } else {
                Ok(template.clone())
            }
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_template(item, bindings)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_template(v, bindings)?);
            }
            Ok(Value::Object(out))
        }
        _ => Ok(template.clone()),
    }
}

/// Truthiness for predicate results: null and false are false; numbers are
/// true when nonzero; strings and containers are true when non-empty.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Canonical edge-label form of a predicate value: `true`/`false` for
/// booleans, integer formatting for whole numbers, raw strings otherwise.
pub fn canonical_label(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                n.to_string()
            }
        }
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Evaluates a predicate expression over the bindings.
pub fn eval_predicate(expr: &str, bindings: &JsonMap) -> Result<Value> {
    let tokens = Lexer::new(expr).run()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        bindings,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ChoraError::execution(format!(
            "trailing input in predicate '{}'",
            expr
        )));
    }
    Ok(value)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Path(String),
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Exists,
    Not,
    And,
    Or,
    Op(&'static str),
    LParen,
    RParen,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            source,
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\n' | '\r' => {
                    self.chars.next();
                }
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                '\'' | '"' => tokens.push(self.string(c)?),
                '0'..='9' => tokens.push(self.number(false)?),
                '-' => {
                    self.chars.next();
                    tokens.push(self.number(true)?);
                }
                '!' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Op("!="));
                    } else {
                        tokens.push(Token::Not);
                    }
                }
                '=' => {
                    self.chars.next();
                    if self.chars.next() != Some('=') {
                        return Err(self.fail("expected '=='"));
                    }
                    tokens.push(Token::Op("=="));
                }
                '>' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Op(">="));
                    } else {
                        tokens.push(Token::Op(">"));
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Op("<="));
                    } else {
                        tokens.push(Token::Op("<"));
                    }
                }
                '&' => {
                    self.chars.next();
                    if self.chars.next() != Some('&') {
                        return Err(self.fail("expected '&&'"));
                    }
                    tokens.push(Token::And);
                }
                '|' => {
                    self.chars.next();
                    if self.chars.next() != Some('|') {
                        return Err(self.fail("expected '||'"));
                    }
                    tokens.push(Token::Or);
                }
                c if c.is_alphabetic() || c == '_' => tokens.push(self.word()),
                _ => return Err(self.fail(&format!("unexpected character '{}'", c))),
            }
        }
        Ok(tokens)
    }

    fn fail(&self, reason: &str) -> ChoraError {
        ChoraError::execution(format!("bad predicate '{}': {}", self.source, reason))
    }

    fn string(&mut self, quote: char) -> Result<Token> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
                None => return Err(self.fail("unterminated string")),
            }
        }
        Ok(Token::Str(s))
    }

    fn number(&mut self, negative: bool) -> Result<Token> {
        let mut s = String::new();
        if negative {
            s.push('-');
        }
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        s.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.fail(&format!("bad number '{}'", s)))
    }

    fn word(&mut self) -> Token {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match s.as_str() {
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            "null" => Token::Null,
            "not" => Token::Not,
            "and" => Token::And,
            "or" => Token::Or,
            "exists" => Token::Exists,
            _ => Token::Path(s),
        }
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    bindings: &'a JsonMap,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(ChoraError::execution(format!(
                "bad predicate: expected {:?}, found {:?}",
                token, other
            ))),
        }
    }

    fn expr(&mut self) -> Result<Value> {
        let mut left = self.and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.and()?;
            left = json!(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.unary()?;
            left = json!(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            let value = self.unary()?;
            return Ok(json!(!truthy(&value)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value> {
        let left = self.term()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Ok(left),
        };
        self.next();
        let right = self.term()?;
        self.compare(op, &left, &right)
    }

    fn compare(&self, op: &str, left: &Value, right: &Value) -> Result<Value> {
        match op {
            "==" => Ok(json!(values_equal(left, right))),
            "!=" => Ok(json!(!values_equal(left, right))),
            _ => {
                let (l, r) = match (left.as_f64(), right.as_f64()) {
                    (Some(l), Some(r)) => (l, r),
                    _ => {
                        return Err(ChoraError::execution(format!(
                            "ordering comparison '{}' requires numbers",
                            op
                        )));
                    }
                };
                let result = match op {
                    ">" => l > r,
                    ">=" => l >= r,
                    "<" => l < r,
                    "<=" => l <= r,
                    _ => unreachable!("lexer only emits known operators"),
                };
                Ok(json!(result))
            }
        }
    }

    fn term(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Number(n)) => Ok(json!(n)),
            Some(Token::Str(s)) => Ok(json!(s)),
            Some(Token::Bool(b)) => Ok(json!(b)),
            Some(Token::Null) => Ok(Value::Null),
            Some(Token::Path(path)) => Ok(lookup_path(self.bindings, &path)
                .cloned()
                .unwrap_or(Value::Null)),
            Some(Token::Exists) => {
                self.expect(Token::LParen)?;
                let path = match self.next() {
                    Some(Token::Path(path)) => path,
                    other => {
                        return Err(ChoraError::execution(format!(
                            "exists() expects a path, found {:?}",
                            other
                        )));
                    }
                };
                self.expect(Token::RParen)?;
                Ok(json!(lookup_path(self.bindings, &path).is_some()))
            }
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            other => Err(ChoraError::execution(format!(
                "bad predicate: unexpected {:?}",
                other
            ))),
        }
    }
}

/// Equality with numeric coercion (`1 == 1.0`); everything else is plain
/// JSON equality.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}
