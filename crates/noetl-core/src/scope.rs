// Template and condition evaluation over the typed scopes spec.md §5
// enumerates: workload, keychain, ctx, iter, args, event, _prev, _task,
// _attempt, outcome. A `Scope` is a flat map of those namespace names
// to arbitrary JSON; every `{{ path }}` / `when:` expression resolves
// against it.
//
// Grounded on the legacy WorkflowState::build_context pattern (dotted
// namespace -> serde_json::Value, later rendered into templates), but
// generalized from the legacy's single flat `steps.*` namespace into
// the full named-scope set this grammar uses, plus a condition
// sub-language for `when:` clauses.

use crate::error::{CoreError, Result};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Scope {
    namespaces: HashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, namespace: impl Into<String>, value: Value) -> &mut Self {
        self.namespaces.insert(namespace.into(), value);
        self
    }

    pub fn with(mut self, namespace: impl Into<String>, value: Value) -> Self {
        self.set(namespace, value);
        self
    }

    /// Resolves a dotted path like `outcome.http.status` or `workload.items`
    /// against the scope's namespaces. Array indices are numeric segments.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = self.namespaces.get(root)?;
        for seg in segments {
            current = match current {
                Value::Object(map) => map.get(seg)?,
                Value::Array(arr) => {
                    let idx: usize = seg.parse().ok()?;
                    arr.get(idx)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Renders a template string. If the whole (trimmed) string is a
    /// single `{{ path }}` placeholder, the resolved value is returned
    /// with its native JSON type preserved (so `{{ workload.items }}`
    /// can resolve to an array, not its string form). Otherwise every
    /// `{{ path }}` occurrence is string-interpolated and the result is
    /// a JSON string.
    pub fn render_template(&self, template: &str) -> Result<Value> {
        let trimmed = template.trim();
        if let Some(path) = whole_placeholder(trimmed) {
            return self
                .get_path(path)
                .cloned()
                .ok_or_else(|| CoreError::TemplateUnresolved(path.to_string()));
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| CoreError::template("unterminated {{ placeholder"))?;
            let path = after[..end].trim();
            let value = self
                .get_path(path)
                .ok_or_else(|| CoreError::TemplateUnresolved(path.to_string()))?;
            out.push_str(&value_to_display_string(value));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }

    /// Evaluates a `when:` boolean expression.
    pub fn eval_condition(&self, expr: &str) -> Result<bool> {
        let tokens = lex(expr)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            scope: self,
        };
        let value = parser.parse_or()?;
        parser.expect_end()?;
        Ok(truthy(&value))
    }
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    Some(inner.trim())
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ---------------------------------------------------------------------
// Condition expression tokenizer + recursive-descent evaluator.
// Grammar: or := and ("or" and)*
//          and := unary ("and" unary)*
//          unary := "not" unary | comparison
//          comparison := operand (cmp_op operand)?
//          operand := literal | path | "(" or ")" | list
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    And,
    Or,
    Not,
    In,
}

fn lex(expr: &str) -> Result<Vec<Tok>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Ne);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Le);
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Ge);
                i += 2;
            }
            '<' => {
                tokens.push(Tok::Lt);
                i += 1;
            }
            '>' => {
                tokens.push(Tok::Gt);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(CoreError::condition("unterminated string literal"));
                }
                i += 1;
                tokens.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                let n: f64 = s
                    .parse()
                    .map_err(|_| CoreError::condition(format!("invalid number: {s}")))?;
                tokens.push(Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(match s.as_str() {
                    "and" => Tok::And,
                    "or" => Tok::Or,
                    "not" => Tok::Not,
                    "in" => Tok::In,
                    "true" => Tok::Ident("true".to_string()),
                    "false" => Tok::Ident("false".to_string()),
                    "null" => Tok::Ident("null".to_string()),
                    _ => Tok::Ident(s),
                });
            }
            other => {
                return Err(CoreError::condition(format!(
                    "unexpected character '{other}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    scope: &'a Scope,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.tokens.len() {
            return Err(CoreError::condition("trailing tokens in condition"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Value> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Tok::Or)) {
            self.advance();
            if truthy(&left) {
                // short-circuit: still parse the rhs to consume tokens
                let _ = self.parse_and()?;
                left = Value::Bool(true);
            } else {
                let right = self.parse_and()?;
                left = Value::Bool(truthy(&right));
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Tok::And)) {
            self.advance();
            if !truthy(&left) {
                let _ = self.parse_not()?;
                left = Value::Bool(false);
            } else {
                let right = self.parse_not()?;
                left = Value::Bool(truthy(&right));
            }
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Value> {
        if matches!(self.peek(), Some(Tok::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Value::Bool(!truthy(&inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Tok::Eq) => Some(Tok::Eq),
            Some(Tok::Ne) => Some(Tok::Ne),
            Some(Tok::Le) => Some(Tok::Le),
            Some(Tok::Ge) => Some(Tok::Ge),
            Some(Tok::Lt) => Some(Tok::Lt),
            Some(Tok::Gt) => Some(Tok::Gt),
            Some(Tok::In) => Some(Tok::In),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_operand()?;
        let result = match op {
            Tok::Eq => values_equal(&left, &right),
            Tok::Ne => !values_equal(&left, &right),
            Tok::In => match &right {
                Value::Array(items) => items.iter().any(|item| values_equal(&left, item)),
                _ => return Err(CoreError::condition("'in' right-hand side must be a list")),
            },
            Tok::Le | Tok::Ge | Tok::Lt | Tok::Gt => {
                let (a, b) = (
                    left.as_f64().ok_or_else(|| {
                        CoreError::condition("ordering comparison requires numeric operands")
                    })?,
                    right.as_f64().ok_or_else(|| {
                        CoreError::condition("ordering comparison requires numeric operands")
                    })?,
                );
                match op {
                    Tok::Le => a <= b,
                    Tok::Ge => a >= b,
                    Tok::Lt => a < b,
                    Tok::Gt => a > b,
                    _ => unreachable!(),
                }
            }
            _ => unreachable!(),
        };
        Ok(Value::Bool(result))
    }

    fn parse_operand(&mut self) -> Result<Value> {
        match self.advance() {
            Some(Tok::Num(n)) => Ok(serde_json::json!(n)),
            Some(Tok::Str(s)) => Ok(Value::String(s)),
            Some(Tok::Ident(s)) if s == "true" => Ok(Value::Bool(true)),
            Some(Tok::Ident(s)) if s == "false" => Ok(Value::Bool(false)),
            Some(Tok::Ident(s)) if s == "null" => Ok(Value::Null),
            Some(Tok::Ident(path)) => self
                .scope
                .get_path(&path)
                .cloned()
                .ok_or_else(|| CoreError::TemplateUnresolved(path)),
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err(CoreError::condition("expected ')'")),
                }
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Tok::RBracket)) {
                    loop {
                        items.push(self.parse_operand()?);
                        match self.peek() {
                            Some(Tok::Comma) => {
                                self.advance();
                            }
                            _ => break,
                        }
                    }
                }
                match self.advance() {
                    Some(Tok::RBracket) => Ok(Value::Array(items)),
                    _ => Err(CoreError::condition("expected ']'")),
                }
            }
            other => Err(CoreError::condition(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a == b;
    }
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scope() -> Scope {
        let mut scope = Scope::new();
        scope.set("workload", serde_json::json!({"enabled": true, "items": [1, 2, 3]}));
        scope.set(
            "outcome",
            serde_json::json!({"http": {"status": 503}, "status": "error"}),
        );
        scope
    }

    #[test]
    fn resolves_dotted_paths() {
        let scope = sample_scope();
        assert_eq!(
            scope.get_path("outcome.http.status"),
            Some(&serde_json::json!(503))
        );
        assert_eq!(scope.get_path("missing.path"), None);
    }

    #[test]
    fn whole_string_template_preserves_type() {
        let scope = sample_scope();
        let rendered = scope.render_template("{{ workload.items }}").unwrap();
        assert_eq!(rendered, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn interpolated_template_produces_string() {
        let scope = sample_scope();
        let rendered = scope
            .render_template("status={{ outcome.http.status }}!")
            .unwrap();
        assert_eq!(rendered, Value::String("status=503!".to_string()));
    }

    #[test]
    fn unresolved_template_path_errors() {
        let scope = sample_scope();
        let err = scope.render_template("{{ nope.nothing }}").unwrap_err();
        assert!(matches!(err, CoreError::TemplateUnresolved(_)));
    }

    #[test]
    fn simple_boolean_path_condition() {
        let scope = sample_scope();
        assert!(scope.eval_condition("workload.enabled").unwrap());
    }

    #[test]
    fn in_list_condition() {
        let scope = sample_scope();
        assert!(scope
            .eval_condition("outcome.http.status in [500, 503]")
            .unwrap());
        assert!(!scope
            .eval_condition("outcome.http.status in [200, 201]")
            .unwrap());
    }

    #[test]
    fn and_or_not_precedence() {
        let scope = sample_scope();
        assert!(scope
            .eval_condition("workload.enabled and not (outcome.status == 'ok')")
            .unwrap());
        assert!(scope
            .eval_condition("outcome.status == 'ok' or outcome.http.status >= 500")
            .unwrap());
    }

    #[test]
    fn string_equality() {
        let scope = sample_scope();
        assert!(scope.eval_condition("outcome.status == 'error'").unwrap());
        assert!(scope.eval_condition("outcome.status != 'ok'").unwrap());
    }
}
