//! Job specification types: argument values, placeholder decorators and
//! per-worker metadata.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ManagerError;

/// Per-worker metadata, keyed by label.
pub type Meta = BTreeMap<String, String>;

/// Default placeholder prefix (`*[name]`)
pub const DEFAULT_PREFIX: &str = "*[";
/// Default placeholder suffix (`*[name]`)
pub const DEFAULT_SUFFIX: &str = "]";

/// Value registered for one placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Broadcast to every worker
    Scalar(String),
    /// One value per worker
    List(Vec<String>),
}

impl ArgValue {
    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        ArgValue::List(values.into_iter().map(|v| v.to_string()).collect())
    }

    /// Length of a list value; `None` for scalars.
    pub fn list_len(&self) -> Option<usize> {
        match self {
            ArgValue::Scalar(_) => None,
            ArgValue::List(values) => Some(values.len()),
        }
    }

    /// Value seen by worker `index`.
    ///
    /// Callers index within the worker count, which every list matches.
    pub fn value_at(&self, index: usize) -> &str {
        match self {
            ArgValue::Scalar(value) => value,
            ArgValue::List(values) => values.get(index).map(String::as_str).unwrap_or(""),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Scalar(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Scalar(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Scalar(value.to_string())
    }
}

impl<T: ToString> From<Vec<T>> for ArgValue {
    fn from(values: Vec<T>) -> Self {
        ArgValue::list(values)
    }
}

impl<T: ToString, const N: usize> From<[T; N]> for ArgValue {
    fn from(values: [T; N]) -> Self {
        ArgValue::list(values)
    }
}

/// Placeholder decoration: `<prefix><name><suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decorator {
    pub prefix: String,
    pub suffix: String,
}

impl Default for Decorator {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

impl Decorator {
    /// Create a decorator, rejecting empty or whitespace-bearing tokens.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Result<Self, ManagerError> {
        let decorator = Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        };
        decorator.validate()?;
        Ok(decorator)
    }

    pub fn validate(&self) -> Result<(), ManagerError> {
        for (which, token) in [("prefix", &self.prefix), ("suffix", &self.suffix)] {
            if token.is_empty() {
                return Err(ManagerError::InvalidDecorator(format!("{} is empty", which)));
            }
            if token.chars().any(char::is_whitespace) {
                return Err(ManagerError::InvalidDecorator(format!(
                    "{} {:?} contains whitespace",
                    which, token
                )));
            }
        }
        Ok(())
    }

    /// Render the placeholder for `name`.
    pub fn placeholder(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name, self.suffix)
    }
}

impl fmt::Display for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.placeholder("name"))
    }
}
