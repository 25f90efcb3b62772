use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primary key of an entity record.
///
/// A key is either a single scalar (a user id) or a composite tuple
/// (`(user_id, channel_username)`). Parts are stored as strings; keys are
/// never mutated after the record is created.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Simple(String),
    Composite(Vec<String>),
}

impl Key {
    pub fn simple(part: impl Into<String>) -> Self {
        Key::Simple(part.into())
    }

    /// Build a composite key. A single part collapses to a simple key so that
    /// `composite(["u1"])` and `simple("u1")` compare equal.
    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        if parts.len() == 1 {
            Key::Simple(parts.remove(0))
        } else {
            Key::Composite(parts)
        }
    }

    pub fn parts(&self) -> Vec<&str> {
        match self {
            Key::Simple(part) => vec![part.as_str()],
            Key::Composite(parts) => parts.iter().map(String::as_str).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Key::Simple(_) => 1,
            Key::Composite(parts) => parts.len(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Simple(part) => write!(f, "{}", part),
            Key::Composite(parts) => write!(f, "({})", parts.join(", ")),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::simple(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Simple(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Simple(value.clone())
    }
}

impl<A: Into<String>, B: Into<String>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Key::Composite(vec![a.into(), b.into()])
    }
}

/// Ordered list of fields a store's primary key (or an index) is built from.
///
/// One field gives a simple key, two or more give a composite key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShape {
    fields: Vec<String>,
}

impl KeyShape {
    pub fn simple(field: impl Into<String>) -> Self {
        KeyShape {
            fields: vec![field.into()],
        }
    }

    pub fn composite<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyShape {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Extract a key from a JSON record. Every field must be present and scalar.
    pub fn extract(&self, value: &Value) -> Result<Key, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "record is not a JSON object".to_string())?;
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let part = object
                .get(field)
                .ok_or_else(|| format!("missing key field `{}`", field))?;
            parts.push(
                scalar_to_part(part)
                    .ok_or_else(|| format!("key field `{}` is not a scalar", field))?,
            );
        }
        Ok(Key::composite(parts))
    }

    /// Like [`extract`](Self::extract) but yields `None` when any field is
    /// missing or not scalar. Used for index values, where such records are
    /// simply left out of the index.
    pub fn try_extract(&self, value: &Value) -> Option<Key> {
        self.extract(value).ok()
    }

    /// Check that `key` fits this shape and agrees with any key fields
    /// present in `value`.
    pub fn check(&self, key: &Key, value: Option<&Value>) -> Result<(), String> {
        if key.arity() != self.arity() {
            return Err(format!(
                "expected {} key part(s) ({}), got {}",
                self.arity(),
                self.fields.join(", "),
                key.arity()
            ));
        }
        let Some(object) = value.and_then(Value::as_object) else {
            return Ok(());
        };
        for (field, part) in self.fields.iter().zip(key.parts()) {
            if let Some(found) = object.get(field).and_then(scalar_to_part) {
                if found != part {
                    return Err(format!(
                        "key field `{}` is `{}` in the value but `{}` in the key",
                        field, found, part
                    ));
                }
            }
        }
        Ok(())
    }
}

fn scalar_to_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
