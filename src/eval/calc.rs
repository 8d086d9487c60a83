//! A small expression language used by the bundled host and the tests.
//!
//! Supported forms:
//!
//! ```text
//! 1 + 2 * (3 - 1)          arithmetic on numbers, `+` also concatenates strings
//! let name = expr          bind a variable in the shared context
//! name = expr              rebind (or create) a variable
//! _                        value of the previous evaluation; `_ = expr` pins it
//! require('process').pid   host modules and member access
//! sleep(250)               suspend the evaluation (statement position only)
//! throw new Error('boom')  raise an error object; `throw expr` raises any value
//! a; b; c                  statement sequence, the last value is the result
//! ```
//!
//! Unclosed parentheses, unterminated strings and dangling operators are
//! reported as [`EvalError::Incomplete`] so an interactive front end can keep
//! reading lines.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{Map, Number, Value};

use super::{EvalContext, EvalError, Evaluation, Evaluator};

/// Longest suspension `sleep` will honour.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Name that reads and writes the last-value slot.
const LAST_VALUE: &str = "_";

/// Evaluator for the bundled expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalcEvaluator;

impl CalcEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for CalcEvaluator {
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        _origin: &'a str,
        context: &'a mut EvalContext,
    ) -> Pin<Box<dyn Future<Output = Evaluation> + Send + 'a>> {
        Box::pin(async move {
            let program = parse(code)?;
            let mut last = None;
            for stmt in program {
                last = match stmt {
                    Stmt::Sleep(expr) => {
                        let millis = as_number(&eval_expr(&expr, context)?)?;
                        tokio::time::sleep(sleep_duration(millis)).await;
                        None
                    }
                    other => exec(&other, context)?,
                };
            }
            Ok(last)
        })
    }
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(char),
}

fn tokenize(code: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || (c == '.' && tokens.last().is_none_or(is_operand_start)) {
            let mut text = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' || d == '_' {
                    if d != '_' {
                        text.push(d);
                    }
                    chars.next();
                } else {
                    break;
                }
            }
            let number = text.parse::<f64>().map_err(|_| {
                EvalError::exception("SyntaxError", format!("Invalid number '{text}'"))
            })?;
            tokens.push(Token::Number(number));
        } else if c == '\'' || c == '"' {
            chars.next();
            tokens.push(Token::Str(read_string(&mut chars, c)?));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' || d == '$' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
        } else if "+-*/%().,=;".contains(c) {
            tokens.push(Token::Punct(c));
            chars.next();
        } else {
            return Err(EvalError::exception(
                "SyntaxError",
                format!("Invalid or unexpected token '{c}'"),
            ));
        }
    }

    Ok(tokens)
}

/// A `.` only starts a number when it cannot be a member access.
fn is_operand_start(previous: &Token) -> bool {
    matches!(previous, Token::Punct(p) if *p != ')')
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    quote: char,
) -> Result<String, EvalError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            None | Some('\n') => {
                return Err(EvalError::Incomplete("Unterminated string literal".into()))
            }
            Some('\\') => match chars.next() {
                None => return Err(EvalError::Incomplete("Unterminated string literal".into())),
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some(other) => text.push(other),
            },
            Some(c) if c == quote => return Ok(text),
            Some(c) => text.push(c),
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Option<Value>),
    Var(String),
    Member(Box<Expr>, String),
    Call(String, Vec<Expr>),
    New(String, Vec<Expr>),
    Neg(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Let(String, Expr),
    Assign(String, Expr),
    Throw(Expr),
    Sleep(Expr),
    Expr(Expr),
}

fn parse(code: &str) -> Result<Vec<Stmt>, EvalError> {
    let tokens = tokenize(code)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut program = Vec::new();

    while parser.peek().is_some() {
        if parser.eat_punct(';') {
            continue;
        }
        program.push(parser.statement()?);
        match parser.peek() {
            None => {}
            Some(Token::Punct(';')) => {
                parser.pos += 1;
            }
            Some(other) => return Err(unexpected(other)),
        }
    }

    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

enum Lead {
    Declare,
    Throw,
    Assign,
    Expr,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Result<Token, EvalError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(end_of_input)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat_punct(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: char) -> Result<(), EvalError> {
        match self.next()? {
            Token::Punct(p) if p == punct => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn ident(&mut self) -> Result<String, EvalError> {
        match self.next()? {
            Token::Ident(name) => Ok(name),
            other => Err(unexpected(&other)),
        }
    }

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        let lead = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(kw)), _) if matches!(kw.as_str(), "let" | "const" | "var") => {
                Lead::Declare
            }
            (Some(Token::Ident(kw)), _) if kw == "throw" => Lead::Throw,
            (Some(Token::Ident(_)), Some(Token::Punct('='))) => Lead::Assign,
            _ => Lead::Expr,
        };

        match lead {
            Lead::Declare => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect_punct('=')?;
                Ok(Stmt::Let(name, self.expr()?))
            }
            Lead::Throw => {
                self.pos += 1;
                Ok(Stmt::Throw(self.expr()?))
            }
            Lead::Assign => {
                let name = self.ident()?;
                self.expect_punct('=')?;
                Ok(Stmt::Assign(name, self.expr()?))
            }
            Lead::Expr => match self.expr()? {
                Expr::Call(name, mut args) if name == "sleep" && args.len() == 1 => {
                    Ok(Stmt::Sleep(args.remove(0)))
                }
                expr => Ok(Stmt::Expr(expr)),
            },
        }
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.term()?;
        while let Some(Token::Punct(op @ ('+' | '-'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.term()?));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Punct(op @ ('*' | '/' | '%'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat_punct('-') {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat_punct('+') {
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        while self.eat_punct('.') {
            expr = Expr::Member(Box::new(expr), self.ident()?);
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next()? {
            Token::Number(n) => Ok(Expr::Literal(Some(number_value(n)?))),
            Token::Str(s) => Ok(Expr::Literal(Some(Value::String(s)))),
            Token::Punct('(') => {
                let inner = self.expr()?;
                self.expect_punct(')')?;
                Ok(inner)
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Some(Value::Bool(true)))),
                "false" => Ok(Expr::Literal(Some(Value::Bool(false)))),
                "null" => Ok(Expr::Literal(Some(Value::Null))),
                "undefined" => Ok(Expr::Literal(None)),
                "new" => {
                    let class = self.ident()?;
                    let args = self.call_args()?;
                    Ok(Expr::New(class, args))
                }
                _ if self.peek() == Some(&Token::Punct('(')) => {
                    let args = self.call_args()?;
                    Ok(Expr::Call(word, args))
                }
                _ => Ok(Expr::Var(word)),
            },
            other => Err(unexpected(&other)),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        self.expect_punct('(')?;
        let mut args = Vec::new();
        if self.eat_punct(')') {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat_punct(')') {
                return Ok(args);
            }
            self.expect_punct(',')?;
        }
    }
}

fn end_of_input() -> EvalError {
    EvalError::Incomplete("Unexpected end of input".into())
}

fn unexpected(token: &Token) -> EvalError {
    let shown = match token {
        Token::Number(n) => n.to_string(),
        Token::Str(s) => format!("'{s}'"),
        Token::Ident(s) => s.clone(),
        Token::Punct(c) => c.to_string(),
    };
    EvalError::exception("SyntaxError", format!("Unexpected token '{shown}'"))
}

// ── Interpreter ───────────────────────────────────────────────────────────────

fn exec(stmt: &Stmt, context: &mut EvalContext) -> Evaluation {
    match stmt {
        Stmt::Let(name, expr) => {
            let value = eval_expr(expr, context)?;
            context.bind(name.clone(), value);
            Ok(None)
        }
        Stmt::Assign(name, expr) => {
            let value = eval_expr(expr, context)?;
            if name == LAST_VALUE {
                context.set_last_value(value.clone());
            } else {
                context.bind(name.clone(), value.clone());
            }
            Ok(value)
        }
        Stmt::Throw(expr) => {
            let value = eval_expr(expr, context)?.unwrap_or(Value::Null);
            Err(EvalError::from_thrown(value))
        }
        Stmt::Sleep(_) => Err(EvalError::exception(
            "TypeError",
            "sleep() can only be used as a statement",
        )),
        Stmt::Expr(expr) => eval_expr(expr, context),
    }
}

fn eval_expr(expr: &Expr, context: &EvalContext) -> Evaluation {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) if name == LAST_VALUE => Ok(context.last_value().cloned()),
        Expr::Var(name) => context
            .lookup(name)
            .ok_or_else(|| EvalError::exception("ReferenceError", format!("{name} is not defined"))),
        Expr::Member(target, key) => match eval_expr(target, context)? {
            Some(Value::Object(map)) => Ok(map.get(key).cloned()),
            Some(Value::String(s)) if key == "length" => Ok(Some(Value::from(s.chars().count()))),
            Some(Value::Array(items)) if key == "length" => Ok(Some(Value::from(items.len()))),
            None => Err(unreadable("undefined", key)),
            Some(Value::Null) => Err(unreadable("null", key)),
            Some(_) => Ok(None),
        },
        Expr::Call(name, args) => call(name, args, context),
        Expr::New(class, args) => {
            let message = match args.first() {
                Some(arg) => display_string(eval_expr(arg, context)?.as_ref()),
                None => String::new(),
            };
            let mut error = Map::new();
            error.insert("name".into(), Value::String(class.clone()));
            error.insert("message".into(), Value::String(message));
            Ok(Some(Value::Object(error)))
        }
        Expr::Neg(inner) => {
            let n = as_number(&eval_expr(inner, context)?)?;
            Ok(Some(number_value(-n)?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, context)?;
            let rhs = eval_expr(rhs, context)?;
            binary(*op, &lhs, &rhs)
        }
    }
}

fn unreadable(target: &str, key: &str) -> EvalError {
    EvalError::exception(
        "TypeError",
        format!("Cannot read properties of {target} (reading '{key}')"),
    )
}

fn call(name: &str, args: &[Expr], context: &EvalContext) -> Evaluation {
    match name {
        "require" => {
            let Some(arg) = args.first() else {
                return Err(EvalError::exception("TypeError", "require() expects a module name"));
            };
            let module = display_string(eval_expr(arg, context)?.as_ref());
            context.module(&module).cloned().map(Some).ok_or_else(|| {
                EvalError::exception("Error", format!("Cannot find module '{module}'"))
            })
        }
        "sleep" => Err(EvalError::exception(
            "TypeError",
            "sleep() can only be used as a statement",
        )),
        other => Err(EvalError::exception(
            "TypeError",
            format!("{other} is not a function"),
        )),
    }
}

fn binary(op: char, lhs: &Option<Value>, rhs: &Option<Value>) -> Evaluation {
    if op == '+'
        && (matches!(lhs, Some(Value::String(_))) || matches!(rhs, Some(Value::String(_))))
    {
        let joined = display_string(lhs.as_ref()) + &display_string(rhs.as_ref());
        return Ok(Some(Value::String(joined)));
    }

    let a = as_number(lhs)?;
    let b = as_number(rhs)?;
    let result = match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        '/' => a / b,
        '%' => a % b,
        other => {
            return Err(EvalError::exception(
                "SyntaxError",
                format!("Unknown operator '{other}'"),
            ))
        }
    };
    Ok(Some(number_value(result)?))
}

fn as_number(value: &Option<Value>) -> Result<f64, EvalError> {
    match value {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| EvalError::exception("RangeError", "number out of range")),
        Some(Value::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        Some(Value::Null) => Ok(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
            EvalError::exception("TypeError", format!("'{s}' is not a number"))
        }),
        None => Err(EvalError::exception("TypeError", "undefined is not a number")),
        Some(_) => Err(EvalError::exception("TypeError", "object is not a number")),
    }
}

/// Integral results stay integers so `1+1` serializes as `2`.
fn number_value(n: f64) -> Result<Value, EvalError> {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        #[allow(clippy::cast_possible_truncation)]
        let whole = n as i64;
        return Ok(Value::from(whole));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| EvalError::exception("RangeError", "result is not a finite number"))
}

fn display_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".into(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn sleep_duration(millis: f64) -> Duration {
    if millis.is_nan() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64((millis / 1000.0).min(MAX_SLEEP.as_secs_f64()))
}
