//! Casting of row values into the columnar store's CSV representation.
//!
//! Values are decided at the ingestion boundary as a closed set of variants,
//! so casting is a total match and can never fail.

use serde_json::{Number, Value};

/// NULL sentinel understood by the columnar store's CSV parser.
pub const NULL_SENTINEL: &str = "\\N";

/// A row value prior to CSV casting.
#[derive(Debug, Clone, PartialEq)]
pub enum CastValue {
    Bool(bool),
    Str(String),
    Num(Number),
    List(Vec<CastValue>),
    Null,
}

/// Casts a value into its CSV field representation.
///
/// - `Bool` → `1` / `0`
/// - `Str` → double-quoted, embedded `"` doubled
/// - `Num` → unchanged, unquoted
/// - `List` → double-quoted `['a','b']`
/// - `Null` → `\N`
pub fn cast_value(value: &CastValue) -> String {
    match value {
        CastValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        CastValue::Str(s) => quote(s),
        CastValue::Num(n) => n.to_string(),
        CastValue::List(items) => quote(&bracketed(items)),
        CastValue::Null => NULL_SENTINEL.to_string(),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn bracketed(items: &[CastValue]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| format!("'{}'", escape_single_quoted(&stringify(item))))
        .collect();
    format!("[{}]", elements.join(","))
}

/// Plain text form of a list element.
fn stringify(value: &CastValue) -> String {
    match value {
        CastValue::Bool(b) => b.to_string(),
        CastValue::Str(s) => s.clone(),
        CastValue::Num(n) => n.to_string(),
        CastValue::List(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        CastValue::Null => "null".to_string(),
    }
}

// Array literal elements are single-quoted; backslash-escape quotes and backslashes.
fn escape_single_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl From<bool> for CastValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for CastValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for CastValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for CastValue {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<i64> for CastValue {
    fn from(n: i64) -> Self {
        Self::Num(n.into())
    }
}

impl From<u64> for CastValue {
    fn from(n: u64) -> Self {
        Self::Num(n.into())
    }
}

impl From<u32> for CastValue {
    fn from(n: u32) -> Self {
        Self::Num(n.into())
    }
}

impl From<f64> for CastValue {
    /// Non-finite floats have no CSV number form and cast as NULL.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map(Self::Num).unwrap_or(Self::Null)
    }
}

impl<T: Into<CastValue>> From<Option<T>> for CastValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl<T: Into<CastValue>> From<Vec<T>> for CastValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for CastValue {
    /// Objects have no row representation and cast as NULL.
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(b),
            Value::String(s) => Self::Str(s),
            Value::Number(n) => Self::Num(n),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Null | Value::Object(_) => Self::Null,
        }
    }
}
