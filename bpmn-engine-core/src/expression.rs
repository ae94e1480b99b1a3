//! Expressions for mappings, conditions, correlation keys and timer durations.
//!
//! A source string starting with `=` is an expression: a variable path
//! (`=order.id`) or a comparison of two operands (`=amount > 100`). Anything else
//! is a static value (JSON if it parses as JSON, otherwise a plain string).
//! Input/output mappings compile to a context expression that builds a document.

use crate::error::{ErrorType, Failure, FailureResult};
use crate::types::Document;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExpressionParseError {
    #[error("empty expression")]
    Empty,
    #[error("invalid operand '{0}'")]
    InvalidOperand(String),
    #[error("invalid mapping target '{0}'")]
    InvalidTarget(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    // Longest tokens first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, CompareOp); 6] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionKind {
    Static(Value),
    Path(Vec<String>),
    Compare {
        left: Box<ExpressionKind>,
        op: CompareOp,
        right: Box<ExpressionKind>,
    },
    /// Builds a document: each source is evaluated and written to its target path.
    Context(Vec<(Vec<String>, ExpressionKind)>),
}

/// A parsed expression together with its source text.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    kind: ExpressionKind,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionParseError> {
        let trimmed = source.trim();
        let kind = match trimmed.strip_prefix('=') {
            Some(body) => parse_body(body)?,
            None => ExpressionKind::Static(
                serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(source.to_string())),
            ),
        };
        Ok(Self {
            source: source.to_string(),
            kind,
        })
    }

    /// Compile `source -> target` pairs into a context expression.
    pub fn mappings<'m>(
        pairs: impl IntoIterator<Item = (&'m str, &'m str)>,
    ) -> Result<Self, ExpressionParseError> {
        let mut entries = Vec::new();
        let mut rendered = Vec::new();
        for (source, target) in pairs {
            let path = parse_path(target)
                .ok_or_else(|| ExpressionParseError::InvalidTarget(target.to_string()))?;
            let source_kind = match source.trim().strip_prefix('=') {
                Some(body) => parse_body(body)?,
                None => parse_body(source)?,
            };
            rendered.push(format!("{source} -> {target}"));
            entries.push((path, source_kind));
        }
        Ok(Self {
            source: format!("{{{}}}", rendered.join(", ")),
            kind: ExpressionKind::Context(entries),
        })
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, ExpressionKind::Static(_))
    }

    pub fn kind(&self) -> &ExpressionKind {
        &self.kind
    }
}

fn parse_body(body: &str) -> Result<ExpressionKind, ExpressionParseError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ExpressionParseError::Empty);
    }
    if let Some((at, token, op)) = find_operator(body) {
        let left = parse_operand(&body[..at])?;
        let right = parse_operand(&body[at + token.len()..])?;
        return Ok(ExpressionKind::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        });
    }
    parse_operand(body)
}

fn find_operator(body: &str) -> Option<(usize, &'static str, CompareOp)> {
    let mut in_string = false;
    for (i, c) in body.char_indices() {
        if c == '"' {
            in_string = !in_string;
        } else if !in_string {
            for (token, op) in CompareOp::TOKENS {
                if body[i..].starts_with(token) {
                    return Some((i, token, op));
                }
            }
        }
    }
    None
}

fn parse_operand(text: &str) -> Result<ExpressionKind, ExpressionParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ExpressionParseError::Empty);
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(ExpressionKind::Static(value));
    }
    parse_path(text)
        .map(ExpressionKind::Path)
        .ok_or_else(|| ExpressionParseError::InvalidOperand(text.to_string()))
}

fn parse_path(text: &str) -> Option<Vec<String>> {
    let segments: Vec<String> = text.trim().split('.').map(str::to_string).collect();
    let valid = segments.iter().all(|segment| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    });
    valid.then_some(segments)
}

// ─── Evaluation ───────────────────────────────────────────────

/// Evaluates expressions against the variables visible at a scope.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &Expression, variables: &Document) -> FailureResult<Value>;

    fn evaluate_bool(&self, expression: &Expression, variables: &Document) -> FailureResult<bool> {
        match self.evaluate(expression, variables)? {
            Value::Bool(b) => Ok(b),
            other => Err(type_mismatch(expression, "BOOLEAN", &other)),
        }
    }

    /// Strings are taken as is; numbers are rendered (correlation keys accept both).
    fn evaluate_string(
        &self,
        expression: &Expression,
        variables: &Document,
    ) -> FailureResult<String> {
        match self.evaluate(expression, variables)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(type_mismatch(expression, "STRING", &other)),
        }
    }

    fn evaluate_document(
        &self,
        expression: &Expression,
        variables: &Document,
    ) -> FailureResult<Document> {
        match self.evaluate(expression, variables)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Document::new()),
            other => Err(type_mismatch(expression, "CONTEXT", &other)),
        }
    }

    /// A number of milliseconds or an ISO-8601 duration such as `PT1M30S` or `P1DT2H`.
    fn evaluate_duration_ms(
        &self,
        expression: &Expression,
        variables: &Document,
    ) -> FailureResult<i64> {
        match self.evaluate(expression, variables)? {
            Value::Number(n) => n
                .as_i64()
                .filter(|ms| *ms >= 0)
                .ok_or_else(|| invalid_duration(expression, &n.to_string())),
            Value::String(s) => {
                parse_iso_duration_ms(&s).ok_or_else(|| invalid_duration(expression, &s))
            }
            other => Err(type_mismatch(expression, "DURATION", &other)),
        }
    }
}

/// Default evaluator: variable paths, comparisons and mapping contexts over JSON values.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonPathEvaluator;

impl ExpressionEvaluator for JsonPathEvaluator {
    fn evaluate(&self, expression: &Expression, variables: &Document) -> FailureResult<Value> {
        eval_kind(expression, &expression.kind, variables)
    }
}

fn eval_kind(
    expression: &Expression,
    kind: &ExpressionKind,
    variables: &Document,
) -> FailureResult<Value> {
    match kind {
        ExpressionKind::Static(value) => Ok(value.clone()),
        ExpressionKind::Path(segments) => resolve_path(expression, segments, variables),
        ExpressionKind::Compare { left, op, right } => {
            let left = eval_kind(expression, left, variables)?;
            let right = eval_kind(expression, right, variables)?;
            compare(expression, &left, *op, &right).map(Value::Bool)
        }
        ExpressionKind::Context(entries) => {
            let mut document = Map::new();
            for (target, source) in entries {
                let value = eval_kind(expression, source, variables)?;
                insert_path(&mut document, target, value);
            }
            Ok(Value::Object(document))
        }
    }
}

fn resolve_path(
    expression: &Expression,
    segments: &[String],
    variables: &Document,
) -> FailureResult<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(extract_failure(expression, "empty path"));
    };
    let mut current = variables.get(head).ok_or_else(|| {
        extract_failure(expression, &format!("no variable found with name '{head}'"))
    })?;
    for segment in rest {
        current = current.get(segment).ok_or_else(|| {
            extract_failure(
                expression,
                &format!("no property found with name '{segment}'"),
            )
        })?;
    }
    Ok(current.clone())
}

fn insert_path(document: &mut Document, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = document;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

fn compare(
    expression: &Expression,
    left: &Value,
    op: CompareOp,
    right: &Value,
) -> FailureResult<bool> {
    match op {
        CompareOp::Eq => return Ok(left == right),
        CompareOp::Ne => return Ok(left != right),
        _ => {}
    }
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return Err(extract_failure(
            expression,
            &format!("can't compare '{left}' with '{right}'"),
        ));
    };
    Ok(match op {
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Eq | CompareOp::Ne => false,
    })
}

/// `P[nD][T[nH][nM][nS]]`, seconds may be fractional.
pub fn parse_iso_duration_ms(text: &str) -> Option<i64> {
    let rest = text.trim().strip_prefix('P')?;
    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };
    let mut total = 0f64;
    if !date.is_empty() {
        let days: f64 = date.strip_suffix('D')?.parse().ok()?;
        total += days * 86_400_000.0;
    }
    if let Some(time) = time {
        if time.is_empty() {
            return None;
        }
        let mut number = String::new();
        for c in time.chars() {
            match c {
                'H' | 'M' | 'S' => {
                    let n: f64 = number.parse().ok()?;
                    number.clear();
                    total += n * match c {
                        'H' => 3_600_000.0,
                        'M' => 60_000.0,
                        _ => 1_000.0,
                    };
                }
                _ => number.push(c),
            }
        }
        if !number.is_empty() {
            return None;
        }
    }
    Some(total as i64)
}

fn extract_failure(expression: &Expression, detail: &str) -> Failure {
    Failure::new(
        format!("Expected to evaluate expression '{expression}', but {detail}"),
        ErrorType::ExtractValueError,
    )
}

fn type_mismatch(expression: &Expression, expected: &str, actual: &Value) -> Failure {
    extract_failure(
        expression,
        &format!("expected result of type {expected} but was '{actual}'"),
    )
}

fn invalid_duration(expression: &Expression, actual: &str) -> Failure {
    extract_failure(expression, &format!("'{actual}' is not a valid duration"))
}
