//! Ordered, case-insensitive, multi-value header collection.
//!
//! # Design Decisions
//! - Names keep the casing they were last set with; lookups ignore ASCII case
//! - Values of one name keep insertion order and are never comma-joined on the wire
//! - A `Vec` is used instead of a hash map: responses carry a handful of headers
//!   and emission order must be stable

use crate::http::error::MessageError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

/// Header collection shared by requests and responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<HeaderEntry>,
}

impl HeaderMap {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a header with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// All values for a header, in insertion order. Empty when absent.
    pub fn get(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].values,
            None => &[],
        }
    }

    /// Values of a header joined with `", "`.
    pub fn get_line(&self, name: &str) -> String {
        self.get(name).join(", ")
    }

    /// Replace all values of a header.
    ///
    /// The header keeps its position if it already existed.
    pub fn set<I, V>(&mut self, name: &str, values: I) -> Result<(), MessageError>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        validate_name(name)?;
        let values = collect_values(name, values)?;

        match self.position(name) {
            Some(i) => {
                self.entries[i] = HeaderEntry {
                    name: name.to_string(),
                    values,
                };
            }
            None => self.entries.push(HeaderEntry {
                name: name.to_string(),
                values,
            }),
        }
        Ok(())
    }

    /// Append a value to a header, creating it if needed.
    pub fn append(&mut self, name: &str, value: impl Into<String>) -> Result<(), MessageError> {
        validate_name(name)?;
        let value = value.into();
        validate_value(name, &value)?;

        match self.position(name) {
            Some(i) => self.entries[i].values.push(value),
            None => self.entries.push(HeaderEntry {
                name: name.to_string(),
                values: vec![value],
            }),
        }
        Ok(())
    }

    /// Remove a header. Returns true if it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Iterate over `(name, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.values.as_slice()))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }
}

fn collect_values<I, V>(name: &str, values: I) -> Result<Vec<String>, MessageError>
where
    I: IntoIterator<Item = V>,
    V: Into<String>,
{
    values
        .into_iter()
        .map(|v| {
            let v = v.into();
            validate_value(name, &v).map(|_| v)
        })
        .collect()
}

fn validate_name(name: &str) -> Result<(), MessageError> {
    let valid = !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        });
    if valid {
        Ok(())
    } else {
        Err(MessageError::InvalidHeaderName(name.to_string()))
    }
}

fn validate_value(name: &str, value: &str) -> Result<(), MessageError> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(MessageError::InvalidHeaderValue {
            name: name.to_string(),
        });
    }
    Ok(())
}
