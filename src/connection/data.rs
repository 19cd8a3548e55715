//! Read-only views over a connection's resolved payload.

use crate::{connection::ConnectionKind, dataset::cut::scalar_to_id};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{cmp::Ordering, collections::HashMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("unexpected {kind} payload: {source}")]
    Shape {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    scalar_to_id(&value).ok_or_else(|| de::Error::custom(format!("invalid id: {value}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub total: f64,
}

impl Observation {
    pub fn new(id: impl Into<String>, total: f64) -> Self {
        Self {
            id: id.into(),
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionValue {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl DimensionValue {
    /// Values without a label are labelled by their id.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Absolute,
    /// Each total divided by the sum of all totals.
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Id,
    Total,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub key: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sort {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    fn compare(&self, a: &Observation, b: &Observation) -> Ordering {
        let ordering = match self.key {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Total => a.total.total_cmp(&b.total),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations(Vec<Observation>);

impl Observations {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self(observations)
    }

    pub fn as_slice(&self) -> &[Observation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.0.get(index)
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().map(|o| o.total).sum()
    }

    pub fn sum_for(&self, id: &str) -> f64 {
        self.0.iter().filter(|o| o.id == id).map(|o| o.total).sum()
    }

    /// Copies the observations, converts them to `format` against the
    /// total of the whole set and only then sorts.
    pub fn formatted(&self, format: Format, sort: Option<Sort>) -> Vec<Observation> {
        let sum = self.sum();
        let mut result: Vec<_> = self
            .0
            .iter()
            .map(|o| Observation {
                id: o.id.clone(),
                total: apply_format(o.total, sum, format),
            })
            .collect();
        if let Some(sort) = sort {
            result.sort_by(|a, b| sort.compare(a, b));
        }
        result
    }

    pub fn value_at(&self, index: usize, format: Format) -> Option<Observation> {
        self.get(index).map(|o| Observation {
            id: o.id.clone(),
            total: apply_format(o.total, self.sum(), format),
        })
    }
}

fn apply_format(total: f64, sum: f64, format: Format) -> f64 {
    match format {
        Format::Absolute => total,
        Format::Percentage if sum == 0.0 => 0.0,
        Format::Percentage => total / sum,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionValues(HashMap<String, DimensionValue>);

impl DimensionValues {
    pub fn get(&self, id: &str) -> Option<&DimensionValue> {
        self.0.get(id)
    }

    pub fn label_for<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(DimensionValue::label).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<DimensionValue> for DimensionValues {
    fn from_iter<T: IntoIterator<Item = DimensionValue>>(iter: T) -> Self {
        Self(iter.into_iter().map(|v| (v.id.clone(), v)).collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DimensionValuesJson {
    List(Vec<DimensionValue>),
    Map(HashMap<String, DimensionValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Observations(Observations),
    DimensionValues(DimensionValues),
    Raw(Value),
}

impl Payload {
    pub fn parse(kind: &ConnectionKind, value: Value) -> Result<Self, PayloadError> {
        match kind {
            ConnectionKind::Observations => serde_json::from_value::<Vec<Observation>>(value)
                .map(|list| Self::Observations(Observations::new(list)))
                .map_err(|source| PayloadError::Shape {
                    kind: "observations",
                    source,
                }),
            ConnectionKind::Dimensions => serde_json::from_value::<DimensionValuesJson>(value)
                .map(|json| {
                    let values = match json {
                        DimensionValuesJson::List(list) => list.into_iter().collect(),
                        DimensionValuesJson::Map(map) => map.into_values().collect(),
                    };
                    Self::DimensionValues(values)
                })
                .map_err(|source| PayloadError::Shape {
                    kind: "dimensions",
                    source,
                }),
            ConnectionKind::Other(_) => Ok(Self::Raw(value)),
        }
    }
}

/// A single value returned by [`Connection::get_value`](super::Connection::get_value).
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Observation(Observation),
    DimensionValue(DimensionValue),
}
