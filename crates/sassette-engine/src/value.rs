use std::fmt::{self, Debug, Display, Formatter};

/// Separator used when rendering a list value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSeparator {
    #[default]
    Comma,
    Space,
}

impl ListSeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListSeparator::Comma => ", ",
            ListSeparator::Space => " ",
        }
    }
}

/// A value exchanged between the engine and a custom function.
///
/// `Error` carries the engine's documented convention for signalling a
/// callback failure: a bridge that cannot produce a value returns
/// `Value::Error`, and the engine routes the message through its own
/// error channel.
#[derive(Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Number { value: f64, unit: String },
    String(String),
    List { items: Vec<Value>, separator: ListSeparator },
    Map(Vec<(Value, Value)>),
    Error(String),
}

impl Value {
    pub const NULL: Value = Self::Null;
    pub const TRUE: Value = Self::Boolean(true);
    pub const FALSE: Value = Self::Boolean(false);

    pub fn number(value: f64) -> Self {
        Value::Number {
            value,
            unit: String::new(),
        }
    }

    pub fn quantity(value: f64, unit: impl Into<String>) -> Self {
        Value::Number {
            value,
            unit: unit.into(),
        }
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List {
            items,
            separator: ListSeparator::default(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// The numeric payload, if this value is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::number(n.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let value = match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Number { value, unit } => format!("{}{}", render_number(*value), unit),
            Value::String(s) => s.clone(),
            Value::List { items, separator } => items
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(separator.as_str()),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join(", "),
            Value::Error(message) => format!("error: {}", message),
        };

        write!(f, "{}", value)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number { value, unit } => write!(f, "{}{}", value, unit),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::List { items, .. } => f.debug_list().entries(items.iter()).finish(),
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Error(message) => write!(f, "error(\"{}\")", message),
        }
    }
}
