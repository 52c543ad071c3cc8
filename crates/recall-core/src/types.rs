use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{RecallError, Result};

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle state shared by namespaces and entries.
///
/// `Pending` versions are still being written, `Ready` is the single live
/// version for its key, and `Replaced` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Ready,
    Replaced,
}

impl Status {
    /// The value stored in the database `status` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Ready => "ready",
            Status::Replaced => "replaced",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "ready" => Ok(Status::Ready),
            "replaced" => Ok(Status::Replaced),
            other => Err(RecallError::Validation(format!("unknown status '{}'", other))),
        }
    }
}

/// Sort direction for listings ordered by creation time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

// =============================================================================
// Namespaces
// =============================================================================

/// The identity tuple of an index configuration.
///
/// Two namespaces with equal configs are versions of the same index; at most
/// one of them is `Ready` at a time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub namespace: String,
    pub model_id: String,
    pub dimension: usize,
    #[serde(default)]
    pub filter_names: Vec<String>,
}

impl NamespaceConfig {
    pub fn new(namespace: impl Into<String>, model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            namespace: namespace.into(),
            model_id: model_id.into(),
            dimension,
            filter_names: Vec::new(),
        }
    }

    pub fn with_filter_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Reject configs that cannot identify an index.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(RecallError::Validation("namespace must not be empty".into()));
        }
        if self.model_id.trim().is_empty() {
            return Err(RecallError::Validation("model_id must not be empty".into()));
        }
        if self.dimension == 0 {
            return Err(RecallError::Validation("dimension must be positive".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.filter_names {
            if name.is_empty() {
                return Err(RecallError::Validation("filter names must not be empty".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(RecallError::Validation(format!(
                    "duplicate filter name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Canonical string form of the config tuple, used as the uniqueness key
    /// for `Ready` namespaces. Filter name order is significant.
    pub fn config_key(&self) -> String {
        serde_json::json!([
            self.namespace,
            self.model_id,
            self.dimension,
            self.filter_names
        ])
        .to_string()
    }
}

/// One version of an index configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub namespace_id: Uuid,
    pub namespace: String,
    pub model_id: String,
    pub dimension: usize,
    pub filter_names: Vec<String>,
    pub status: Status,
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

impl Namespace {
    pub fn config(&self) -> NamespaceConfig {
        NamespaceConfig {
            namespace: self.namespace.clone(),
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            filter_names: self.filter_names.clone(),
        }
    }

    /// Check that every filter name is declared by this namespace.
    pub fn check_filter_names<'a, I>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            if !self.filter_names.iter().any(|n| n == name) {
                return Err(RecallError::Validation(format!(
                    "filter '{}' is not declared by namespace '{}'",
                    name, self.namespace
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Entries
// =============================================================================

/// A named filter value attached to an entry, or requested by a search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterValue {
    pub name: String,
    pub value: Value,
}

impl FilterValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Canonical JSON encoding used for exact-equality matching.
    pub fn canonical_value(&self) -> String {
        self.value.to_string()
    }
}

fn default_importance() -> f64 {
    1.0
}

/// Caller-supplied description of an entry to create.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryInput {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub filter_values: Vec<FilterValue>,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Default for EntryInput {
    fn default() -> Self {
        Self {
            key: None,
            title: None,
            content_hash: None,
            filter_values: Vec::new(),
            importance: default_importance(),
            metadata: None,
        }
    }
}

impl EntryInput {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.importance.is_finite() || !(0.0..=1.0).contains(&self.importance) {
            return Err(RecallError::Validation(format!(
                "importance {} must be within [0, 1]",
                self.importance
            )));
        }
        if let Some(key) = &self.key {
            if key.is_empty() {
                return Err(RecallError::Validation("key must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// One logical document within a namespace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_id: Uuid,
    pub namespace_id: Uuid,
    pub key: Option<String>,
    pub title: Option<String>,
    pub content_hash: Option<String>,
    pub filter_values: Vec<FilterValue>,
    pub importance: f64,
    pub metadata: Option<Value>,
    pub status: Status,
    /// Chunking strategy that produced this entry's chunks, if recorded.
    pub chunker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Chunks
// =============================================================================

/// Retrievable content of a chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkContent {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Caller-supplied chunk to write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkInput {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub searchable_text: Option<String>,
}

impl ChunkInput {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
            embedding,
            searchable_text: None,
        }
    }
}

/// A stored chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub entry_id: Uuid,
    pub order: u32,
    pub content: ChunkContent,
    pub embedding: Vec<f32>,
    pub searchable_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_str() {
        for status in [Status::Pending, Status::Ready, Status::Replaced] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("deleted".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&Status::Replaced).unwrap();
        assert_eq!(json, "\"replaced\"");
    }

    #[test]
    fn test_config_key_distinguishes_filter_order() {
        let a = NamespaceConfig::new("docs", "minilm", 384).with_filter_names(["region", "lang"]);
        let b = NamespaceConfig::new("docs", "minilm", 384).with_filter_names(["lang", "region"]);
        assert_ne!(a.config_key(), b.config_key());
        assert_eq!(a.config_key(), a.clone().config_key());
    }

    #[test]
    fn test_config_key_distinguishes_dimension() {
        let a = NamespaceConfig::new("docs", "minilm", 384);
        let b = NamespaceConfig::new("docs", "minilm", 768);
        assert_ne!(a.config_key(), b.config_key());
    }

    #[test]
    fn test_config_validate() {
        assert!(NamespaceConfig::new("docs", "m", 3).validate().is_ok());
        assert!(NamespaceConfig::new("", "m", 3).validate().is_err());
        assert!(NamespaceConfig::new("docs", "", 3).validate().is_err());
        assert!(NamespaceConfig::new("docs", "m", 0).validate().is_err());
        let dup = NamespaceConfig::new("docs", "m", 3).with_filter_names(["a", "a"]);
        assert!(matches!(dup.validate(), Err(RecallError::Validation(_))));
    }

    #[test]
    fn test_entry_input_defaults() {
        let input: EntryInput = serde_json::from_str("{}").unwrap();
        assert_eq!(input.importance, 1.0);
        assert!(input.filter_values.is_empty());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_entry_input_importance_range() {
        let mut input = EntryInput::keyed("doc");
        input.importance = 1.5;
        assert!(input.validate().is_err());
        input.importance = f64::NAN;
        assert!(input.validate().is_err());
        input.importance = 0.0;
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_filter_canonical_value() {
        let f = FilterValue::new("region", "us");
        assert_eq!(f.canonical_value(), "\"us\"");
        let n = FilterValue::new("year", 2024);
        assert_eq!(n.canonical_value(), "2024");
    }

    #[test]
    fn test_check_filter_names() {
        let ns = Namespace {
            namespace_id: Uuid::new_v4(),
            namespace: "docs".into(),
            model_id: "m".into(),
            dimension: 3,
            filter_names: vec!["region".into()],
            status: Status::Ready,
            version: 1,
            created_at: Utc::now(),
        };
        assert!(ns.check_filter_names(["region"]).is_ok());
        assert!(ns.check_filter_names(["lang"]).is_err());
    }
}
