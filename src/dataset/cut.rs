use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

/// Filter applied to a single dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum CutValue {
    Id(String),
    /// Half-open `[from, to)` bucket range.
    Range { from: String, to: String },
}

impl CutValue {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn range(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Range {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id),
            Self::Range { .. } => None,
        }
    }

    pub fn matches_id(&self, id: &str) -> bool {
        self.as_id() == Some(id)
    }
}

impl fmt::Display for CutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => f.write_str(id),
            Self::Range { from, to } => write!(f, "{from},{to}"),
        }
    }
}

impl From<&str> for CutValue {
    fn from(id: &str) -> Self {
        Self::id(id)
    }
}

impl From<String> for CutValue {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

/// Ids arrive from the API either as strings or as numbers.
pub(crate) fn scalar_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl TryFrom<Value> for CutValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if let Value::Array(items) = &value {
            return match items.as_slice() {
                [from, to] => match (scalar_to_id(from), scalar_to_id(to)) {
                    (Some(from), Some(to)) => Ok(Self::Range { from, to }),
                    _ => Err(format!("range bounds must be scalars: {value}")),
                },
                _ => Err(format!("range must have exactly two bounds: {value}")),
            };
        }
        scalar_to_id(&value)
            .map(Self::Id)
            .ok_or_else(|| format!("invalid cut value: {value}"))
    }
}

impl From<CutValue> for Value {
    fn from(value: CutValue) -> Self {
        match value {
            CutValue::Id(id) => Value::String(id),
            CutValue::Range { from, to } => Value::Array(vec![from.into(), to.into()]),
        }
    }
}

/// Canonical filter state: a dimension is cut iff its key is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cut(BTreeMap<String, CutValue>);

impl Cut {
    pub fn get(&self, dimension: &str) -> Option<&CutValue> {
        self.0.get(dimension)
    }

    pub fn contains(&self, dimension: &str) -> bool {
        self.0.contains_key(dimension)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CutValue)> {
        self.0.iter()
    }

    /// Merges `partial` in; a `None` value removes the dimension.
    pub fn apply(&mut self, partial: &PartialCut) {
        for (dimension, value) in partial.iter() {
            match value {
                Some(value) => {
                    self.0.insert(dimension.clone(), value.clone());
                }
                None => {
                    self.0.remove(dimension);
                }
            }
        }
    }

    /// Flattened `key=value` pairs for the request query.
    pub fn query_pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.0
            .iter()
            .map(|(dimension, value)| (dimension.clone(), value.to_string()))
    }
}

impl<K: Into<String>, V: Into<CutValue>> FromIterator<(K, V)> for Cut {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A change to the canonical cut. `None` is the explicit "uncut" marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialCut(BTreeMap<String, Option<CutValue>>);

impl PartialCut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, dimension: impl Into<String>, value: impl Into<CutValue>) -> Self {
        self.0.insert(dimension.into(), Some(value.into()));
        self
    }

    pub fn unset(mut self, dimension: impl Into<String>) -> Self {
        self.0.insert(dimension.into(), None);
        self
    }

    pub fn removing<I, S>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        dimensions
            .into_iter()
            .fold(Self::new(), |partial, dimension| partial.unset(dimension))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<CutValue>)> {
        self.0.iter()
    }

    /// The single dimension touched, if exactly one is.
    pub fn single_dimension(&self) -> Option<&str> {
        match self.0.len() {
            1 => self.0.keys().next().map(String::as_str),
            _ => None,
        }
    }
}
