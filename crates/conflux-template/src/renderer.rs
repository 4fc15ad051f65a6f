//! Template evaluation using minijinja.
//!
//! # Typed results
//! A template that is exactly one `{{ expression }}` evaluates to the
//! expression's value with its JSON type intact:
//! ```json
//! { "count": "{{ steps.list.output.total }}" }   // -> 42, not "42"
//! ```
//! Anything else (literal text around or between expressions, blocks)
//! renders to a string.
//!
//! # Strictness
//! Missing fields are errors rather than empty strings, so a reference to a
//! step that never produced the field fails loudly.

use std::borrow::Cow;
use std::sync::LazyLock;

use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use regex::{Captures, Regex};

use crate::error::TemplateError;

/// Template delimiters: `{{ ... }}` and `{% ... %}`.
static TEMPLATE_BLOCK: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}").expect("valid regex"));

/// Go-style root references: `.params`, `.steps`, `.workflow`.
static LEADING_DOT: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(^|[^A-Za-z0-9_.\])'"])\.(params|steps|workflow)\b"#).expect("valid regex")
});

/// A template made of a single expression and nothing else.
static SINGLE_EXPRESSION: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)^\s*\{\{-?\s*(.*?)\s*-?\}\}\s*$").expect("valid regex"));

/// Evaluates templates against a workflow context.
///
/// The executor only talks to this trait, so the expression language can be
/// swapped without touching scheduling code.
pub trait TemplateRenderer: Send + Sync {
  /// Render a template, returning a typed value for single-expression
  /// templates and a string otherwise.
  fn render(
    &self,
    template: &str,
    context: &serde_json::Value,
  ) -> Result<serde_json::Value, TemplateError>;

  /// Evaluate a step condition.
  fn evaluate_condition(
    &self,
    template: &str,
    context: &serde_json::Value,
  ) -> Result<bool, TemplateError>;

  /// Check that a template parses, without evaluating it.
  fn check(&self, template: &str) -> Result<(), TemplateError>;
}

/// The default [`TemplateRenderer`], backed by minijinja.
#[derive(Debug, Clone, Default)]
pub struct JinjaRenderer;

impl JinjaRenderer {
  pub fn new() -> Self {
    Self
  }

  fn environment<'source>(&self) -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("json", json_filter);
    env.add_filter("fromjson", fromjson_filter);
    env.add_filter("quote", quote_filter);
    env
  }
}

impl TemplateRenderer for JinjaRenderer {
  fn render(
    &self,
    template: &str,
    context: &serde_json::Value,
  ) -> Result<serde_json::Value, TemplateError> {
    let source = normalize(template);
    let env = self.environment();
    let ctx = Value::from_serialize(context);

    if let Some(expr) = single_expression(&source) {
      let compiled = env
        .compile_expression(expr)
        .map_err(|e| syntax_error(template, &e))?;
      let value = compiled.eval(ctx).map_err(|e| render_error(template, &e))?;
      if value.is_undefined() {
        return Err(TemplateError::Render {
          template: template.to_string(),
          message: format!("`{}` is undefined", expr),
        });
      }
      return serde_json::to_value(&value).map_err(|e| TemplateError::Render {
        template: template.to_string(),
        message: e.to_string(),
      });
    }

    env
      .render_str(&source, ctx)
      .map(serde_json::Value::String)
      .map_err(|e| classify(template, &e))
  }

  fn evaluate_condition(
    &self,
    template: &str,
    context: &serde_json::Value,
  ) -> Result<bool, TemplateError> {
    match self.render(template, context)? {
      serde_json::Value::Bool(b) => Ok(b),
      serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        _ => Err(TemplateError::NotBoolean {
          template: template.to_string(),
          value: s,
        }),
      },
      serde_json::Value::Null => Ok(false),
      other => Ok(Value::from_serialize(&other).is_true()),
    }
  }

  fn check(&self, template: &str) -> Result<(), TemplateError> {
    let source = normalize(template);
    let env = self.environment();

    match single_expression(&source) {
      Some(expr) => env
        .compile_expression(expr)
        .map(|_| ())
        .map_err(|e| syntax_error(template, &e)),
      None => env
        .template_from_str(&source)
        .map(|_| ())
        .map_err(|e| syntax_error(template, &e)),
    }
  }
}

/// Render every string leaf of a JSON value. Non-string leaves pass through.
pub fn render_value(
  renderer: &dyn TemplateRenderer,
  value: &serde_json::Value,
  context: &serde_json::Value,
) -> Result<serde_json::Value, TemplateError> {
  match value {
    serde_json::Value::String(s) => renderer.render(s, context),
    serde_json::Value::Array(items) => items
      .iter()
      .map(|v| render_value(renderer, v, context))
      .collect::<Result<Vec<_>, _>>()
      .map(serde_json::Value::Array),
    serde_json::Value::Object(map) => {
      let mut rendered = serde_json::Map::with_capacity(map.len());
      for (key, v) in map {
        rendered.insert(key.clone(), render_value(renderer, v, context)?);
      }
      Ok(serde_json::Value::Object(rendered))
    }
    other => Ok(other.clone()),
  }
}

/// Strip Go-style leading dots inside template delimiters.
fn normalize(template: &str) -> Cow<'_, str> {
  if !template.contains('.') {
    return Cow::Borrowed(template);
  }
  TEMPLATE_BLOCK.replace_all(template, |caps: &Captures| {
    LEADING_DOT.replace_all(&caps[0], "$1$2").into_owned()
  })
}

fn single_expression(source: &str) -> Option<&str> {
  let caps = SINGLE_EXPRESSION.captures(source)?;
  let expr = caps.get(1)?.as_str();
  if expr.is_empty() || expr.contains("}}") || expr.contains("{{") || expr.contains("{%") {
    return None;
  }
  Some(expr)
}

fn classify(template: &str, err: &minijinja::Error) -> TemplateError {
  match err.kind() {
    ErrorKind::SyntaxError => syntax_error(template, err),
    _ => render_error(template, err),
  }
}

fn syntax_error(template: &str, err: &minijinja::Error) -> TemplateError {
  TemplateError::Syntax {
    template: template.to_string(),
    message: err.to_string(),
  }
}

fn render_error(template: &str, err: &minijinja::Error) -> TemplateError {
  TemplateError::Render {
    template: template.to_string(),
    message: err.to_string(),
  }
}

fn json_filter(value: Value) -> Result<String, minijinja::Error> {
  serde_json::to_string(&value)
    .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn fromjson_filter(text: String) -> Result<Value, minijinja::Error> {
  let parsed: serde_json::Value = serde_json::from_str(&text)
    .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
  Ok(Value::from_serialize(&parsed))
}

fn quote_filter(text: String) -> Result<String, minijinja::Error> {
  serde_json::to_string(&text)
    .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}
