use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An identified document with arbitrary fields, scoped to a collection.
///
/// The identifier is an opaque string; the storage layer never
/// interprets its structure. An empty id asks the engine to assign one
/// on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// A record with no id yet; the engine assigns one on save.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            id: String::new(),
            fields,
        }
    }

    pub fn with_id(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from any serializable value. Fails if the value
    /// does not serialize to a JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(value)?)
    }

    /// Deserialize the record (id included) into a typed value.
    pub fn deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Merge partial fields into this record, replacing existing keys.
    pub fn merge(&mut self, partial: Map<String, Value>) {
        for (key, value) in partial {
            self.fields.insert(key, value);
        }
    }

    /// Resolve an engine-assigned id when the caller omitted one.
    pub(crate) fn ensure_id(mut self) -> Self {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self
    }
}
