//! Placeholder resolution for step configuration.
//!
//! Placeholders use `{{ ... }}` and are evaluated against a data tree built
//! from the [`PipelineContext`]:
//!
//! - current values at the top level (`{{ .user_id }}`),
//! - `steps`: outputs of earlier steps (`{{ .steps.fetch-user.row.id }}`),
//! - `trigger`: the data that started the pipeline,
//! - `meta`: pipeline metadata.
//!
//! Besides dot paths, three lookup forms are understood:
//! `{{ step "name" "key" }}`, `{{ trigger "key" }}` and
//! `{{ index .steps "name" "key" }}`. Comments (`{{/* ... */}}`) render
//! nothing. Path segments may contain hyphens; numeric segments index lists.
//!
//! Each action is rewritten into a minijinja expression and the whole
//! template is rendered by minijinja. Dot paths become subscripts of a
//! single root variable and the lookup forms become calls to `index`.
//!
//! Strings render verbatim and missing values render as an empty string.
//! Whole-number floats render without a fraction, so a row id that crossed
//! the plugin boundary as `42.0` still renders as `42`. Lists and maps
//! render as JSON.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::iter::Peekable;
use std::sync::Arc;
use std::vec;

use minijinja::value::{Rest, ValueKind};
use minijinja::{Environment, ErrorKind, Output, State, UndefinedBehavior};
use serde_json::{Number, Value};

use crate::engine::{PipelineContext, ValueMap};
use crate::error::PluginError;

/// Variable holding the data tree inside rewritten templates.
const ROOT: &str = "__root";

/// Resolves placeholders in strings and configuration maps.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    env: Arc<Environment<'static>>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_keep_trailing_newline(true);
        env.set_formatter(write_value);
        env.add_function(
            "index",
            |value: minijinja::Value, keys: Rest<minijinja::Value>| {
                keys.0
                    .into_iter()
                    .fold(value, |node, key| index_item(&node, &key))
            },
        );
        Self { env: Arc::new(env) }
    }

    /// Resolves every placeholder in `text`.
    ///
    /// Text without `{{` is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Template`] for unterminated or unsupported
    /// actions.
    pub fn resolve(&self, text: &str, context: &PipelineContext) -> Result<String, PluginError> {
        if !text.contains("{{") {
            return Ok(text.to_owned());
        }
        self.render(text, &template_data(context))
            .map_err(|message| PluginError::Template { message })
    }

    /// Resolves placeholders in every string of `map`, recursing into nested
    /// maps and lists. Non-string values are copied unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Template`] whose message names the failing
    /// field, for example `field "url": unterminated action`.
    pub fn resolve_map(
        &self,
        map: &ValueMap,
        context: &PipelineContext,
    ) -> Result<ValueMap, PluginError> {
        let data = template_data(context);
        self.resolve_map_with(map, &data)
            .map_err(|message| PluginError::Template { message })
    }

    /// Resolves placeholders inside a single value.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Template`] when any nested string fails.
    pub fn resolve_value(
        &self,
        value: &Value,
        context: &PipelineContext,
    ) -> Result<Value, PluginError> {
        let data = template_data(context);
        self.resolve_value_with(value, &data)
            .map_err(|message| PluginError::Template { message })
    }

    fn resolve_map_with(&self, map: &ValueMap, data: &Value) -> Result<ValueMap, String> {
        map.iter()
            .map(|(key, value)| {
                self.resolve_value_with(value, data)
                    .map(|resolved| (key.clone(), resolved))
                    .map_err(|message| format!("field {key:?}: {message}"))
            })
            .collect()
    }

    fn resolve_value_with(&self, value: &Value, data: &Value) -> Result<Value, String> {
        match value {
            Value::String(text) if text.contains("{{") => {
                self.render(text, data).map(Value::String)
            }
            Value::Object(map) => self.resolve_map_with(map, data).map(Value::Object),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value_with(item, data))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn render(&self, text: &str, data: &Value) -> Result<String, String> {
        let source = translate(text)?;
        let root = minijinja::Value::from_serialize(BTreeMap::from([(ROOT, data)]));
        self.env
            .render_str(&source, root)
            .map_err(|error| error.to_string())
    }
}

fn template_data(context: &PipelineContext) -> Value {
    let mut data = context.current.clone();
    let steps = context
        .step_outputs
        .iter()
        .map(|(name, output)| (name.clone(), Value::Object(output.clone())))
        .collect();
    data.insert("steps".to_owned(), Value::Object(steps));
    data.insert("trigger".to_owned(), Value::Object(context.trigger_data.clone()));
    data.insert("meta".to_owned(), Value::Object(context.metadata.clone()));
    Value::Object(data)
}

/// Looks `key` up in `node`; string keys made of digits index lists.
fn index_item(node: &minijinja::Value, key: &minijinja::Value) -> minijinja::Value {
    let position = key.as_str().and_then(|text| text.parse::<i64>().ok());
    let lookup = match (node.kind(), position) {
        (ValueKind::Seq, Some(offset)) => minijinja::Value::from(offset),
        _ => key.clone(),
    };
    node.get_item(&lookup).unwrap_or(minijinja::Value::UNDEFINED)
}

fn write_value(
    out: &mut Output<'_>,
    _state: &State<'_, '_>,
    value: &minijinja::Value,
) -> Result<(), minijinja::Error> {
    let json = serde_json::to_value(value).map_err(|error| {
        minijinja::Error::new(ErrorKind::BadSerialization, error.to_string())
    })?;
    out.write_str(&render_value(&json)).map_err(|error| {
        minijinja::Error::new(ErrorKind::WriteFailure, "failed to write output").with_source(error)
    })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => whole_numbers(other).to_string(),
    }
}

/// Rewrites floats without a fractional part as integers, recursively.
fn whole_numbers(value: &Value) -> Value {
    match value {
        Value::Number(number) => {
            Value::Number(whole_number(number).unwrap_or_else(|| number.clone()))
        }
        Value::Array(items) => Value::Array(items.iter().map(whole_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), whole_numbers(item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn whole_number(number: &Number) -> Option<Number> {
    if !number.is_f64() {
        return None;
    }
    // `Display` for f64 omits the fraction of whole numbers.
    let text = number.as_f64()?.to_string();
    text.parse::<i64>()
        .map(Number::from)
        .or_else(|_| text.parse::<u64>().map(Number::from))
        .ok()
}

/// Rewrites a template into minijinja syntax.
fn translate(text: &str) -> Result<String, String> {
    let mut source = String::with_capacity(text.len());
    let mut rest = text;
    while let Some((before, after)) = rest.split_once("{{") {
        push_text(&mut source, before)?;
        let (action, tail) =
            split_action(after).ok_or_else(|| format!("unterminated action in {text:?}"))?;
        push_action(&mut source, action)?;
        rest = tail;
    }
    push_text(&mut source, rest)?;
    Ok(source)
}

/// Copies literal text, quoting it when minijinja would read it as markup.
fn push_text(source: &mut String, text: &str) -> Result<(), String> {
    if text.contains('{') {
        let quoted = serde_json::to_string(text).map_err(|error| error.to_string())?;
        source.push_str("{{ ");
        source.push_str(&quoted);
        source.push_str(" }}");
    } else {
        source.push_str(text);
    }
    Ok(())
}

/// Splits at the first `}}` that is not inside a string literal.
fn split_action(text: &str) -> Option<(&str, &str)> {
    let mut quote = None;
    let mut escaped = false;
    for (position, c) in text.char_indices() {
        match quote {
            Some('"') if escaped => escaped = false,
            Some('"') if c == '\\' => escaped = true,
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '"' || c == '`' => quote = Some(c),
            None if c == '}' => {
                let (action, closing) = text.split_at_checked(position)?;
                if let Some(tail) = closing.strip_prefix("}}") {
                    return Some((action, tail));
                }
            }
            None => {}
        }
    }
    None
}

fn push_action(source: &mut String, action: &str) -> Result<(), String> {
    let (trim_left, unmarked) = match action.strip_prefix('-') {
        Some(rest) if rest.starts_with(char::is_whitespace) => (true, rest),
        _ => (false, action),
    };
    let (trim_right, inner) = match unmarked.strip_suffix('-') {
        Some(rest) if rest.ends_with(char::is_whitespace) => (true, rest),
        _ => (false, unmarked),
    };
    let body = inner.trim();
    let expression = if body.starts_with("/*") && body.ends_with("*/") {
        String::from("\"\"")
    } else {
        expression(body)?
    };
    source.push_str(if trim_left { "{{- " } else { "{{ " });
    source.push_str(&expression);
    source.push_str(if trim_right { " -}}" } else { " }}" });
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Token {
    /// Operand already in minijinja syntax.
    Operand(String),
    Ident(String),
    Open,
    Close,
}

type Tokens = Peekable<vec::IntoIter<Token>>;

fn expression(body: &str) -> Result<String, String> {
    if body.is_empty() {
        return Err(String::from("empty action"));
    }
    let mut tokens = tokenize(body)?.into_iter().peekable();
    let translated = command(&mut tokens)?;
    match tokens.next() {
        None => Ok(translated),
        Some(_) => Err(format!("unbalanced parentheses in {body:?}")),
    }
}

/// A function call with its arguments, or a single operand.
fn command(tokens: &mut Tokens) -> Result<String, String> {
    let function = match tokens.peek() {
        Some(Token::Ident(name)) if !is_constant(name) => Some(name.clone()),
        _ => None,
    };
    if let Some(name) = function {
        tokens.next();
        let mut args = Vec::new();
        while tokens.peek().is_some_and(|token| *token != Token::Close) {
            args.push(operand(tokens)?);
        }
        return call(&name, args);
    }
    let single = operand(tokens)?;
    match tokens.peek() {
        None | Some(Token::Close) => Ok(single),
        Some(_) => Err(String::from("only functions take arguments")),
    }
}

fn operand(tokens: &mut Tokens) -> Result<String, String> {
    match tokens.next() {
        Some(Token::Operand(text)) => Ok(text),
        Some(Token::Ident(name)) => match name.as_str() {
            "true" | "false" => Ok(name),
            "nil" => Ok(String::from("none")),
            _ => call(&name, Vec::new()),
        },
        Some(Token::Open) => {
            let inner = command(tokens)?;
            match tokens.next() {
                Some(Token::Close) => Ok(format!("({inner})")),
                _ => Err(String::from("unbalanced parentheses")),
            }
        }
        Some(Token::Close) => Err(String::from("unbalanced parentheses")),
        None => Err(String::from("missing operand")),
    }
}

fn is_constant(name: &str) -> bool {
    matches!(name, "true" | "false" | "nil")
}

fn call(name: &str, args: Vec<String>) -> Result<String, String> {
    let mut operands = args.into_iter();
    let target = match name {
        "step" => format!("{ROOT}[\"steps\"]"),
        "trigger" => format!("{ROOT}[\"trigger\"]"),
        "index" => operands
            .next()
            .ok_or_else(|| String::from("index expects a value to index"))?,
        other => return Err(format!("unsupported function {other:?}")),
    };
    let joined = std::iter::once(target)
        .chain(operands)
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("index({joined})"))
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(&next) = chars.peek() {
        match next {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' | '`' => {
                chars.next();
                tokens.push(Token::Operand(string_literal(next, &mut chars, body)?));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"' | '`') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(classify(&word)?);
            }
        }
    }
    Ok(tokens)
}

/// Reads a literal whose opening quote was consumed and requotes it as a
/// JSON string, which minijinja accepts verbatim.
fn string_literal(
    quote: char,
    chars: &mut impl Iterator<Item = char>,
    body: &str,
) -> Result<String, String> {
    let mut literal = String::new();
    while let Some(c) = chars.next() {
        match c {
            c if c == quote => {
                return serde_json::to_string(&literal).map_err(|error| error.to_string());
            }
            '\\' if quote == '"' => match chars.next() {
                Some('n') => literal.push('\n'),
                Some('t') => literal.push('\t'),
                Some('r') => literal.push('\r'),
                Some(escaped) => literal.push(escaped),
                None => break,
            },
            other => literal.push(other),
        }
    }
    Err(format!("unterminated string in {body:?}"))
}

fn classify(word: &str) -> Result<Token, String> {
    if let Some(path) = word.strip_prefix('.') {
        return dot_path(word, path).map(Token::Operand);
    }
    if word.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
        return word
            .parse::<f64>()
            .map(|_| Token::Operand(word.to_owned()))
            .map_err(|_| format!("invalid number {word:?}"));
    }
    if word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Ok(Token::Ident(word.to_owned()));
    }
    Err(format!("unsupported token {word:?}"))
}

/// `.a.b-c.1` becomes `__root["a"]["b-c"][1]`.
fn dot_path(word: &str, path: &str) -> Result<String, String> {
    let mut translated = String::from(ROOT);
    if path.is_empty() {
        return Ok(translated);
    }
    for segment in path.split('.') {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(format!("invalid path {word:?}"));
        }
        let quote = if segment.chars().all(|c| c.is_ascii_digit()) { "" } else { "\"" };
        translated.push('[');
        translated.push_str(quote);
        translated.push_str(segment);
        translated.push_str(quote);
        translated.push(']');
    }
    Ok(translated)
}

#[cfg(test)]
mod tests;
