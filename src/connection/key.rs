use crate::dataset::cut::Cut;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static UNIQUE_KEYS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionKind {
    Observations,
    Dimensions,
    /// Never deduplicated: every request gets a fresh connection.
    Other(String),
}

impl ConnectionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Observations => "observations",
            Self::Dimensions => "dimensions",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ConnectionKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "observations" => Self::Observations,
            "dimensions" => Self::Dimensions,
            _ => Self::Other(kind),
        }
    }
}

impl From<ConnectionKind> for String {
    fn from(kind: ConnectionKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Request parameters of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub measure: Option<String>,
    pub aggregation: String,
    #[serde(default)]
    pub bucket: Option<f64>,
    #[serde(default)]
    pub bucket_interval: Option<f64>,
}

impl ConnectionSpec {
    pub fn observations(dimension: Option<&str>, measure: Option<&str>, aggregation: &str) -> Self {
        Self {
            kind: ConnectionKind::Observations,
            dimension: dimension.map(str::to_string),
            measure: measure.map(str::to_string),
            aggregation: aggregation.to_string(),
            bucket: None,
            bucket_interval: None,
        }
    }

    pub fn dimensions(dimension: &str, measure: Option<&str>, aggregation: &str) -> Self {
        Self {
            kind: ConnectionKind::Dimensions,
            ..Self::observations(Some(dimension), measure, aggregation)
        }
    }

    pub fn with_bucket(mut self, bucket: Option<f64>, bucket_interval: Option<f64>) -> Self {
        self.bucket = bucket;
        self.bucket_interval = bucket_interval;
        self
    }

    /// Pool key. Equal keys share one connection.
    ///
    /// Dimension values don't depend on measure, aggregation or bucketing,
    /// so only the field takes part in their key.
    pub fn key(&self) -> String {
        match &self.kind {
            ConnectionKind::Dimensions => {
                let dimension = self.dimension.as_deref().unwrap_or_default();
                format!("dimensions:{dimension}")
            }
            ConnectionKind::Observations => {
                let mut key = format!(
                    "observations:{}:{}:{}",
                    self.dimension.as_deref().unwrap_or("NODIM"),
                    self.measure.as_deref().unwrap_or_default(),
                    self.aggregation,
                );
                if let Some(bucket_interval) = self.bucket_interval {
                    key.push_str(&format!(":{bucket_interval}"));
                }
                if let Some(bucket) = self.bucket {
                    key.push_str(&format!(":{bucket}"));
                }
                key
            }
            ConnectionKind::Other(name) => {
                format!("{name}#{}", UNIQUE_KEYS.fetch_add(1, Ordering::Relaxed))
            }
        }
    }

    pub fn path(&self, dataset_id: &str) -> String {
        let mut path = format!("api/datasets/{dataset_id}/{}/", self.kind);
        if let Some(dimension) = &self.dimension {
            path.push_str(dimension);
        }
        path
    }

    /// Query pairs for a request made under `cut`. Order carries no meaning.
    pub fn query(&self, cut: &Cut) -> Vec<(String, String)> {
        let mut query = vec![("aggregation".to_string(), self.aggregation.clone())];
        if let Some(measure) = &self.measure {
            query.push(("measure".to_string(), measure.clone()));
        }
        if let Some(bucket) = self.bucket {
            query.push(("bucket".to_string(), bucket.to_string()));
        }
        if let Some(bucket_interval) = self.bucket_interval {
            query.push(("bucket_interval".to_string(), bucket_interval.to_string()));
        }
        query.extend(cut.query_pairs());
        query
    }
}
