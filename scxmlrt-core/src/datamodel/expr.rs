//! Expression language of the JSON data model.
//!
//! A small, JavaScript-flavoured language over `serde_json` values:
//!
//! - literals: `1`, `2.5`, `'text'`, `"text"`, `true`, `false`, `null`,
//!   `[1, 2]`, `{"a": 1, b: 2}`
//! - variables and paths: `x`, `order.items[0].price`, `cfg['key']`
//! - `!expr`, `-expr`
//! - `*`, `/`, `%`, then `+`, `-` (`+` concatenates when a side is a string)
//! - `<`, `<=`, `>`, `>=` on numbers or strings
//! - `==`, `!=`, `===`, `!==` (structural, numbers compared by value)
//! - `&&` binds tighter than `||`; both short-circuit
//! - `(expr)` for grouping
//! - `In('state')` tests the live configuration
//!
//! Scripts are `;`-separated statements, each either `location = expr` or a
//! bare expression.

use serde_json::{Map, Number, Value};

/// What expressions can see.
pub trait Environment {
    /// Value of a top-level name, `None` if undeclared.
    fn variable(&self, name: &str) -> Option<&Value>;
    /// The `In(...)` predicate.
    fn in_state(&self, state: &str) -> bool;
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// One step of a location path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A resolved assignable location: a top-level name plus a path below it.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub root: String,
    pub path: Vec<Segment>,
}

/// A script statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign(Expr, Expr),
    Expr(Expr),
}

impl Expr {
    /// Evaluates the expression.
    pub fn evaluate(&self, env: &dyn Environment) -> Result<Value, String> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Array(items) => items
                .iter()
                .map(|e| e.evaluate(env))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (k, e) in entries {
                    map.insert(k.clone(), e.evaluate(env)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Var(name) => env
                .variable(name)
                .cloned()
                .ok_or_else(|| format!("{} is not defined", name)),
            Expr::Member(base, key) => {
                let base = base.evaluate(env)?;
                member(&base, key)
            }
            Expr::Index(base, index) => {
                let base = base.evaluate(env)?;
                let index = index.evaluate(env)?;
                match (&base, &index) {
                    (Value::Array(items), Value::Number(_)) => {
                        let i = as_index(&index)?;
                        Ok(items.get(i).cloned().unwrap_or(Value::Null))
                    }
                    (_, Value::String(key)) => member(&base, key),
                    _ => Err(format!("cannot index {} with {}", type_name(&base), index)),
                }
            }
            Expr::Call(name, args) => match name.as_str() {
                "In" => {
                    if args.len() != 1 {
                        return Err("In() takes exactly one argument".to_string());
                    }
                    match args[0].evaluate(env)? {
                        Value::String(state) => Ok(Value::Bool(env.in_state(&state))),
                        other => Err(format!("In() expects a state name, got {}", other)),
                    }
                }
                _ => Err(format!("{} is not a function", name)),
            },
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(env)?))),
            Expr::Neg(inner) => match inner.evaluate(env)? {
                Value::Number(n) => number(-n.as_f64().unwrap_or(0.0)),
                other => Err(format!("cannot negate {}", type_name(&other))),
            },
            Expr::And(left, right) => {
                let l = left.evaluate(env)?;
                if !is_truthy(&l) {
                    return Ok(l);
                }
                right.evaluate(env)
            }
            Expr::Or(left, right) => {
                let l = left.evaluate(env)?;
                if is_truthy(&l) {
                    return Ok(l);
                }
                right.evaluate(env)
            }
            Expr::Binary(op, left, right) => {
                let l = left.evaluate(env)?;
                let r = right.evaluate(env)?;
                binary(*op, &l, &r)
            }
        }
    }

    /// Resolves the expression as an assignable location.
    pub fn location(&self, env: &dyn Environment) -> Result<Location, String> {
        match self {
            Expr::Var(name) => Ok(Location {
                root: name.clone(),
                path: Vec::new(),
            }),
            Expr::Member(base, key) => {
                let mut loc = base.location(env)?;
                loc.path.push(Segment::Key(key.clone()));
                Ok(loc)
            }
            Expr::Index(base, index) => {
                let mut loc = base.location(env)?;
                match index.evaluate(env)? {
                    Value::String(key) => loc.path.push(Segment::Key(key)),
                    idx @ Value::Number(_) => loc.path.push(Segment::Index(as_index(&idx)?)),
                    other => return Err(format!("invalid index {}", other)),
                }
                Ok(loc)
            }
            _ => Err("expression is not an assignable location".to_string()),
        }
    }
}

fn member(base: &Value, key: &str) -> Result<Value, String> {
    match base {
        Value::Object(map) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if key == "length" => Ok(Value::from(items.len())),
        Value::String(s) if key == "length" => Ok(Value::from(s.chars().count())),
        Value::Array(_) | Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            Ok(Value::Null)
        }
        Value::Null => Err(format!("cannot read property '{}' of null", key)),
    }
}

fn as_index(value: &Value) -> Result<usize, String> {
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as usize),
        _ => Err(format!("invalid array index {}", value)),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r))),
        BinaryOp::Add => match (l, r) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", to_display(l), to_display(r))))
            }
            _ => arithmetic(op, l, r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, l, r),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| format!("cannot compare {} with {}", type_name(l), type_name(r)))?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, String> {
    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) if l.is_number() && r.is_number() => (a, b),
        _ => {
            return Err(format!(
                "invalid operands {} and {} for arithmetic",
                type_name(l),
                type_name(r)
            ))
        }
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err("division by zero".to_string()),
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    number(result)
}

/// Converts an `f64` into a JSON number, preferring integers.
fn number(f: f64) -> Result<Value, String> {
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::Number(Number::from(f as i64)));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| format!("{} is not a finite number", f))
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// String form used by `+` concatenation and string evaluation.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parses expressions, locations and scripts.
pub struct ExprParser;

impl ExprParser {
    pub fn expression(source: &str) -> Result<Expr, String> {
        let source = source.trim();
        if source.is_empty() {
            return Err("empty expression".to_string());
        }
        let mut parser = Parser::new(source);
        let expr = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(expr)
    }

    /// Parses a location such as `a.b[0]`.
    pub fn location(source: &str) -> Result<Expr, String> {
        let expr = Self::expression(source)?;
        if !is_location_shape(&expr) {
            return Err(format!("'{}' is not a valid location", source.trim()));
        }
        Ok(expr)
    }

    pub fn script(source: &str) -> Result<Vec<Statement>, String> {
        let mut parser = Parser::new(source);
        let mut statements = Vec::new();
        loop {
            parser.skip_whitespace();
            while parser.peek_char() == Some(';') {
                parser.pos += 1;
                parser.skip_whitespace();
            }
            if parser.at_end() {
                break;
            }
            // `var x = ...` declares like a plain assignment.
            if parser.peek_str("var ") {
                parser.pos += 4;
            }
            let target = parser.parse_expr()?;
            parser.skip_whitespace();
            if parser.peek_char() == Some('=') && !parser.peek_str("==") {
                parser.pos += 1;
                if !is_location_shape(&target) {
                    return Err("left side of assignment is not a location".to_string());
                }
                let value = parser.parse_expr()?;
                statements.push(Statement::Assign(target, value));
            } else {
                statements.push(Statement::Expr(target));
            }
            parser.skip_whitespace();
            match parser.peek_char() {
                None => break,
                Some(';') => parser.pos += 1,
                Some(c) => return Err(format!("unexpected '{}' at {}", c, parser.pos)),
            }
        }
        Ok(statements)
    }
}

fn is_location_shape(expr: &Expr) -> bool {
    match expr {
        Expr::Var(_) => true,
        Expr::Member(base, _) | Expr::Index(base, _) => is_location_shape(base),
        _ => false,
    }
}

/// Recursive descent parser over the raw source.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_comparison()?;
        loop {
            self.skip_whitespace();
            let (op, len) = if self.peek_str("===") {
                (BinaryOp::Eq, 3)
            } else if self.peek_str("!==") {
                (BinaryOp::Ne, 3)
            } else if self.peek_str("==") {
                (BinaryOp::Eq, 2)
            } else if self.peek_str("!=") {
                (BinaryOp::Ne, 2)
            } else {
                return Ok(left);
            };
            self.pos += len;
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_whitespace();
            let (op, len) = if self.peek_str("<=") {
                (BinaryOp::Le, 2)
            } else if self.peek_str(">=") {
                (BinaryOp::Ge, 2)
            } else if self.peek_char() == Some('<') {
                (BinaryOp::Lt, 1)
            } else if self.peek_char() == Some('>') {
                (BinaryOp::Gt, 1)
            } else {
                return Ok(left);
            };
            self.pos += len;
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                Some('%') => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        self.skip_whitespace();

        match self.peek_char() {
            Some('!') => {
                self.pos += 1;
                let inner = self.parse_unary()?;
                Ok(Expr::Not(Box::new(inner)))
            }
            Some('-') => {
                self.pos += 1;
                let inner = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_whitespace();
            match self.peek_char() {
                Some('.') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    let key = self.parse_identifier()?;
                    expr = Expr::Member(Box::new(expr), key);
                }
                Some('[') => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(']')?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some('(') => {
                    let name = match &expr {
                        Expr::Var(name) => name.clone(),
                        _ => return Err("only named functions can be called".to_string()),
                    };
                    self.pos += 1;
                    let args = self.parse_list(')')?;
                    expr = Expr::Call(name, args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        self.skip_whitespace();

        match self.peek_char() {
            None => Err("unexpected end of expression".to_string()),
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some('[') => {
                self.pos += 1;
                Ok(Expr::Array(self.parse_list(']')?))
            }
            Some('{') => {
                self.pos += 1;
                self.parse_object()
            }
            Some('"') | Some('\'') => Ok(Expr::Literal(Value::String(self.parse_string()?))),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some(c) if is_ident_start(c) => {
                let ident = self.parse_identifier()?;
                Ok(match ident.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" | "undefined" => Expr::Literal(Value::Null),
                    _ => Expr::Var(ident),
                })
            }
            Some(c) => Err(format!("unexpected '{}' at {}", c, self.pos)),
        }
    }

    /// Comma-separated expressions up to `close`.
    fn parse_list(&mut self, close: char) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek_char() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            self.skip_whitespace();
            match self.peek_char() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(format!("expected ',' or '{}'", close)),
            }
        }
    }

    fn parse_object(&mut self) -> Result<Expr, String> {
        let mut entries = Vec::new();
        self.skip_whitespace();
        if self.peek_char() == Some('}') {
            self.pos += 1;
            return Ok(Expr::Object(entries));
        }
        loop {
            self.skip_whitespace();
            let key = match self.peek_char() {
                Some('"') | Some('\'') => self.parse_string()?,
                _ => self.parse_identifier()?,
            };
            self.expect(':')?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.peek_char() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(Expr::Object(entries));
                }
                _ => return Err("expected ',' or '}'".to_string()),
            }
        }
    }

    fn parse_identifier(&mut self) -> Result<String, String> {
        let start = self.pos;
        match self.peek_char() {
            Some(c) if is_ident_start(c) => self.pos += c.len_utf8(),
            _ => return Err(format!("expected identifier at {}", self.pos)),
        }
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_string(&mut self) -> Result<String, String> {
        let quote = match self.peek_char() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err("expected string".to_string()),
        };
        self.pos += 1;

        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                let escaped = self.peek_char().ok_or("unterminated string")?;
                self.pos += escaped.len_utf8();
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                out.push(c);
            }
        }

        Err("unterminated string".to_string())
    }

    fn parse_number(&mut self) -> Result<Expr, String> {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }

        let mut fractional = false;
        if self.peek_char() == Some('.')
            && self.input[self.pos + 1..]
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            fractional = true;
            self.pos += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let text = &self.input[start..self.pos];
        if !fractional {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Expr::Literal(Value::Number(Number::from(i))));
            }
        }
        let f = text
            .parse::<f64>()
            .map_err(|_| format!("invalid number: '{}'", text))?;
        number(f).map(Expr::Literal)
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        self.skip_whitespace();
        if self.peek_char() != Some(c) {
            return Err(format!("expected '{}' at {}", c, self.pos));
        }
        self.pos += 1;
        Ok(())
    }

    fn expect_end(&mut self) -> Result<(), String> {
        self.skip_whitespace();
        match self.peek_char() {
            None => Ok(()),
            Some(c) => Err(format!("unexpected '{}' at {}", c, self.pos)),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}
