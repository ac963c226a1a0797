//! Time-series sample storage.
//!
//! The delivery engine reads history through [`StorageAdapter`]; the history
//! logger writes through it. Timestamps are ISO-8601 strings and range
//! queries compare them as strings with both bounds exclusive.

use async_trait::async_trait;
use sensorlink_core::field::{Field, FieldType, FieldValue};
use sensorlink_core::flags::{Category, Quality};
use sensorlink_core::syntax::DecodeError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One stored field reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// ISO-8601 instant
    pub timestamp: String,
    /// Node the reading belongs to
    pub node_id: String,
    /// Field type code (`q`, `i`, ...)
    pub kind: String,
    /// Field name
    pub field_name: String,
    /// Textual value
    pub value: String,
    /// Unit of a quantity, or type name of an enum
    pub unit: Option<String>,
}

impl Sample {
    /// Capture a field reading.
    #[must_use]
    pub fn from_field(node_id: &str, timestamp: &str, field: &Field) -> Self {
        let value = field.value();
        Self {
            timestamp: timestamp.to_string(),
            node_id: node_id.to_string(),
            kind: field.kind().code().to_string(),
            field_name: field.name().to_string(),
            value: value.text().to_string(),
            unit: value
                .unit()
                .or_else(|| value.enum_type())
                .map(ToString::to_string),
        }
    }

    /// Rebuild the reading as a historical field.
    ///
    /// # Errors
    ///
    /// Returns error if the stored type or value is not valid.
    pub fn to_field(&self) -> Result<Field, DecodeError> {
        let kind = FieldType::from_code(&self.kind)?;
        let (unit, enum_type) = match kind {
            FieldType::Quantity => (self.unit.clone(), None),
            FieldType::Enum => (None, self.unit.clone()),
            _ => (None, None),
        };
        let value = FieldValue::new(kind, self.value.as_str(), unit, enum_type)?;
        Ok(Field::new(self.field_name.as_str(), value)
            .with_category(Category::Historical, true)
            .with_quality(Quality::AutomaticReadout, true))
    }
}

/// Append/range-query store of samples.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Store one sample.
    async fn append(&self, sample: Sample) -> Result<(), StorageError>;

    /// Samples of one node and field with `from < timestamp < to`, ascending.
    async fn range_query(
        &self,
        node_id: &str,
        field_name: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<Sample>, StorageError>;

    /// Every node with at least one sample.
    async fn nodes(&self) -> Result<Vec<String>, StorageError>;

    /// Every field name stored for a node.
    async fn field_names(&self, node_id: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory sample store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    samples: Arc<RwLock<Vec<Sample>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn append(&self, sample: Sample) -> Result<(), StorageError> {
        self.samples.write().await.push(sample);
        Ok(())
    }

    async fn range_query(
        &self,
        node_id: &str,
        field_name: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<Sample>, StorageError> {
        let samples = self.samples.read().await;
        let mut matches: Vec<Sample> = samples
            .iter()
            .filter(|s| s.node_id == node_id && s.field_name == field_name)
            .filter(|s| s.timestamp.as_str() > from && s.timestamp.as_str() < to)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matches)
    }

    async fn nodes(&self) -> Result<Vec<String>, StorageError> {
        let samples = self.samples.read().await;
        let mut nodes: Vec<String> = Vec::new();
        for sample in samples.iter() {
            if !nodes.contains(&sample.node_id) {
                nodes.push(sample.node_id.clone());
            }
        }
        Ok(nodes)
    }

    async fn field_names(&self, node_id: &str) -> Result<Vec<String>, StorageError> {
        let samples = self.samples.read().await;
        let mut names: Vec<String> = Vec::new();
        for sample in samples.iter().filter(|s| s.node_id == node_id) {
            if !names.contains(&sample.field_name) {
                names.push(sample.field_name.clone());
            }
        }
        Ok(names)
    }
}

/// Opaque failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(node: &str, field: &str, timestamp: &str, value: &str) -> Sample {
        Sample {
            timestamp: timestamp.to_string(),
            node_id: node.to_string(),
            kind: "q".to_string(),
            field_name: field.to_string(),
            value: value.to_string(),
            unit: Some("C".to_string()),
        }
    }

    #[tokio::test]
    async fn range_query_bounds_are_exclusive() {
        let store = MemoryStore::new();
        for ts in ["2020-01-01", "2020-01-01T06:00:00", "2020-01-02"] {
            store.append(sample("pump1", "temperature", ts, "1")).await.unwrap();
        }

        let hits = store
            .range_query("pump1", "temperature", "2020-01-01", "2020-01-02")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].timestamp, "2020-01-01T06:00:00");
    }

    #[tokio::test]
    async fn range_query_sorts_and_filters() {
        let store = MemoryStore::new();
        store.append(sample("pump1", "temperature", "2020-01-01T03", "3")).await.unwrap();
        store.append(sample("pump1", "temperature", "2020-01-01T01", "1")).await.unwrap();
        store.append(sample("pump1", "pressure", "2020-01-01T02", "2")).await.unwrap();
        store.append(sample("pump2", "temperature", "2020-01-01T02", "2")).await.unwrap();

        let hits = store
            .range_query("pump1", "temperature", "2020-01-01", "2020-01-02")
            .await
            .unwrap();
        let values: Vec<&str> = hits.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, vec!["1", "3"]);

        assert_eq!(store.nodes().await.unwrap(), vec!["pump1", "pump2"]);
        assert_eq!(
            store.field_names("pump1").await.unwrap(),
            vec!["temperature", "pressure"]
        );
    }

    #[test]
    fn sample_field_conversion() {
        let field = Field::new(
            "mode",
            FieldValue::new(FieldType::Enum, "eco", None, Some("ModeType".into())).unwrap(),
        );
        let stored = Sample::from_field("pump1", "2020-01-01T00:00:00", &field);
        assert_eq!(stored.kind, "e");
        assert_eq!(stored.unit.as_deref(), Some("ModeType"));

        let restored = stored.to_field().unwrap();
        assert_eq!(restored.value(), field.value());
        assert!(restored.categories.is_set(Category::Historical));
        assert!(restored.qualities.is_set(Quality::AutomaticReadout));

        let mut broken = stored;
        broken.kind = "zz".to_string();
        assert!(broken.to_field().is_err());
    }
}
