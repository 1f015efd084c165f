use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::errors::{Result, StarError};

/// One parameter value read back from an application's parameter file.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The toolkit's "bad" (undefined) value.
    Bad,
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Array(Vec<Value>),
    Group(ResultRecord),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Reals, and integers widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&ResultRecord> {
        match self {
            Value::Group(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, Value::Bad)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bad => f.write_str("*"),
            Value::Logical(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Group(record) => {
                f.write_str("{")?;
                for (i, (name, value)) in record.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Bad => serializer.serialize_none(),
            Value::Logical(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Real(r) => serializer.serialize_f64(*r),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Array(items) => items.serialize(serializer),
            Value::Group(record) => record.serialize(serializer),
        }
    }
}

/// Immutable, ordered set of named values produced by one command run.
///
/// Field names are stored lowercased; lookups are case-insensitive. The field
/// set is whatever the parameter file held, so callers discover it through
/// `field_names`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRecord {
    name: String,
    fields: Vec<(String, Value)>,
}

impl ResultRecord {
    pub fn new(name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        let field = field.to_lowercase();
        self.fields.iter().find(|(k, _)| *k == field).map(|(_, v)| v)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check a known schema: every listed field must be present.
    pub fn expect_fields(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|f| !self.contains(f))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StarError::malformed(
                &self.name,
                format!("missing fields: {}", missing.join(", ")),
            ))
        }
    }
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

const LINE_WIDTH: usize = 79;
const GUTTER: usize = 4;

/// Aligned listing: names right-aligned in one column, long arrays broken
/// one element per line.
impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let indent = " ".repeat(width + GUTTER);

        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{name:>width$}{}", " ".repeat(GUTTER))?;

            let rendered = value.to_string();
            match value {
                Value::Array(items)
                    if !items.is_empty()
                        && rendered.len() > LINE_WIDTH.saturating_sub(width + GUTTER) =>
                {
                    write!(f, "[ {}", items[0])?;
                    for item in &items[1..] {
                        write!(f, "\n{indent}  {item}")?;
                    }
                    write!(f, "\n{indent}]")?;
                }
                _ => f.write_str(&rendered)?,
            }
        }
        Ok(())
    }
}
