//! Observed state values and their transport encoding.
//!
//! Inspected applications send plain JSON. Anything JSON cannot carry
//! (`undefined`, functions, symbols, non-finite numbers, back-references
//! produced by cycle detection on the application side) travels as a marker
//! string of the form `~~~ <text> ~~~`. [`ValueCodec`] converts between that
//! wire form and [`StateValue`].

use crate::config::DEFAULT_MAX_DECODE_DEPTH;
use crate::error::DecodeError;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

const MARKER_OPEN: &str = "~~~ ";
const MARKER_CLOSE: &str = " ~~~";

const UNDEFINED: &str = "undefined";
const CIRCULAR: &str = "Circular Reference";
const ANONYMOUS_FUNCTION: &str = "anonymous function";
const NAN: &str = "NaN";
const INFINITY: &str = "Infinity";
const NEGATIVE_INFINITY: &str = "-Infinity";

// Older clients replaced falsy values with markers before stringifying.
const LEGACY_NULL: &str = "null";
const LEGACY_FALSE: &str = "false";
const LEGACY_ZERO: &str = "zero";
const LEGACY_EMPTY_STRING: &str = "empty string";

/// A value observed in an inspected application's store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StateValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<StateValue>),
    Object(BTreeMap<String, StateValue>),
    Special(Special),
}

/// Values with no JSON counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Special {
    /// Back-reference emitted where the application found a cycle.
    Circular,
    Function(Option<String>),
    Symbol(String),
    NaN,
    Infinity,
    NegativeInfinity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Tree,
}

/// Coarse classification the rendering layer maps onto its palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTone {
    Nullish,
    Boolean,
    Number,
    String,
    Special,
    Tree,
}

impl StateValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            StateValue::Array(_) | StateValue::Object(_) => ValueKind::Tree,
            _ => ValueKind::Scalar,
        }
    }

    pub fn is_tree(&self) -> bool {
        self.kind() == ValueKind::Tree
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, StateValue::Undefined)
    }

    pub fn tone(&self) -> ValueTone {
        match self {
            StateValue::Undefined | StateValue::Null => ValueTone::Nullish,
            StateValue::Bool(_) => ValueTone::Boolean,
            StateValue::Number(_) => ValueTone::Number,
            StateValue::String(_) => ValueTone::String,
            StateValue::Special(Special::NaN)
            | StateValue::Special(Special::Infinity)
            | StateValue::Special(Special::NegativeInfinity) => ValueTone::Number,
            StateValue::Special(_) => ValueTone::Special,
            StateValue::Array(_) | StateValue::Object(_) => ValueTone::Tree,
        }
    }

    /// Single-line text for a watch row. Trees render as compact JSON.
    pub fn display_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Undefined => f.write_str(UNDEFINED),
            StateValue::Null => f.write_str("null"),
            StateValue::Bool(b) => write!(f, "{}", b),
            StateValue::Number(n) => write!(f, "{}", n),
            StateValue::String(s) => f.write_str(s),
            StateValue::Special(special) => write!(f, "{}", special),
            tree => write!(f, "{}", encode(tree)),
        }
    }
}

impl fmt::Display for Special {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Special::Circular => f.write_str(CIRCULAR),
            Special::Function(None) => f.write_str(ANONYMOUS_FUNCTION),
            Special::Function(Some(name)) => write!(f, "{}()", name),
            Special::Symbol(description) => write!(f, "Symbol({})", description),
            Special::NaN => f.write_str(NAN),
            Special::Infinity => f.write_str(INFINITY),
            Special::NegativeInfinity => f.write_str(NEGATIVE_INFINITY),
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        StateValue::Bool(b)
    }
}

impl From<i64> for StateValue {
    fn from(n: i64) -> Self {
        StateValue::Number(n.into())
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::String(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::String(s)
    }
}

impl From<f64> for StateValue {
    fn from(n: f64) -> Self {
        if n.is_nan() {
            StateValue::Special(Special::NaN)
        } else if n == f64::INFINITY {
            StateValue::Special(Special::Infinity)
        } else if n == f64::NEG_INFINITY {
            StateValue::Special(Special::NegativeInfinity)
        } else {
            // Finite values always convert.
            Number::from_f64(n)
                .map(StateValue::Number)
                .unwrap_or(StateValue::Special(Special::NaN))
        }
    }
}

/// Converts between [`StateValue`] and its JSON wire form.
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    max_depth: usize,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECODE_DEPTH)
    }
}

impl ValueCodec {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn encode(&self, value: &StateValue) -> Value {
        encode(value)
    }

    pub fn decode(&self, value: &Value) -> Result<StateValue, DecodeError> {
        decode_inner(value, 0, self.max_depth)
    }

    /// Decode raw transported text. Empty input is `Undefined`, not an error.
    pub fn decode_str(&self, text: &str) -> Result<StateValue, DecodeError> {
        if text.trim().is_empty() {
            return Ok(StateValue::Undefined);
        }
        let value: Value = serde_json::from_str(text)?;
        self.decode(&value)
    }
}

/// Encoding is total and deterministic: object keys are emitted in order.
pub fn encode(value: &StateValue) -> Value {
    match value {
        StateValue::Undefined => marker(UNDEFINED),
        StateValue::Null => Value::Null,
        StateValue::Bool(b) => Value::Bool(*b),
        StateValue::Number(n) => Value::Number(n.clone()),
        StateValue::String(s) => Value::String(s.clone()),
        StateValue::Array(items) => Value::Array(items.iter().map(encode).collect()),
        StateValue::Object(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (key, field) in fields {
                map.insert(key.clone(), encode(field));
            }
            Value::Object(map)
        }
        StateValue::Special(special) => marker(&special.to_string()),
    }
}

fn marker(text: &str) -> Value {
    Value::String(format!("{}{}{}", MARKER_OPEN, text, MARKER_CLOSE))
}

fn decode_inner(value: &Value, depth: usize, limit: usize) -> Result<StateValue, DecodeError> {
    if depth > limit {
        return Err(DecodeError::TooDeep { limit });
    }

    Ok(match value {
        Value::Null => StateValue::Null,
        Value::Bool(b) => StateValue::Bool(*b),
        Value::Number(n) => StateValue::Number(n.clone()),
        Value::String(s) => decode_string(s)?,
        Value::Array(items) => StateValue::Array(
            items
                .iter()
                .map(|item| decode_inner(item, depth + 1, limit))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut fields = BTreeMap::new();
            for (key, field) in map {
                fields.insert(key.clone(), decode_inner(field, depth + 1, limit)?);
            }
            StateValue::Object(fields)
        }
    })
}

fn decode_string(s: &str) -> Result<StateValue, DecodeError> {
    let inner = match s
        .strip_prefix(MARKER_OPEN)
        .and_then(|rest| rest.strip_suffix(MARKER_CLOSE))
    {
        Some(inner) => inner,
        None => return Ok(StateValue::String(s.to_string())),
    };

    let decoded = match inner {
        UNDEFINED => StateValue::Undefined,
        CIRCULAR => StateValue::Special(Special::Circular),
        ANONYMOUS_FUNCTION => StateValue::Special(Special::Function(None)),
        NAN => StateValue::Special(Special::NaN),
        INFINITY => StateValue::Special(Special::Infinity),
        NEGATIVE_INFINITY => StateValue::Special(Special::NegativeInfinity),
        LEGACY_NULL => StateValue::Null,
        LEGACY_FALSE => StateValue::Bool(false),
        LEGACY_ZERO => StateValue::Number(0.into()),
        LEGACY_EMPTY_STRING => StateValue::String(String::new()),
        other => {
            if let Some(description) = other
                .strip_prefix("Symbol(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                StateValue::Special(Special::Symbol(description.to_string()))
            } else if let Some(name) = other.strip_suffix("()").filter(|n| is_function_name(n)) {
                StateValue::Special(Special::Function(Some(name.to_string())))
            } else {
                return Err(DecodeError::MalformedMarker(s.to_string()));
            }
        }
    };

    Ok(decoded)
}

fn is_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
}
