//! Record types flowing through the enrichment pipeline.
//!
//! Definitions and entities are produced upstream and are read-only here.
//! [`DerivedFieldValue`] is the only shape this crate writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw attribute value copied verbatim from a source entity.
///
/// The engine never inspects or coerces it.
pub type FieldValue = serde_json::Value;

/// Tenant/partition key bounding both the definition set and the entity set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub connection_id: u64,
    pub workspace_id: u64,
}

impl Scope {
    pub fn new(connection_id: u64, workspace_id: u64) -> Self {
        Self {
            connection_id,
            workspace_id,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.workspace_id)
    }
}

/// A custom-field descriptor discovered for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub scope: Scope,
    /// Physical column on the source entity holding the raw value.
    pub field_key: String,
    /// Human label.
    pub display_name: String,
}

impl FieldDefinition {
    pub fn new(
        scope: Scope,
        field_key: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            field_key: field_key.into(),
            display_name: display_name.into(),
        }
    }

    /// Processing order: display name ascending, field key breaking ties.
    pub fn sort_key(&self) -> (&str, &str) {
        (&self.display_name, &self.field_key)
    }
}

/// A scanned entity row, keyed by column name so attributes named only at
/// run time can be projected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntity {
    pub entity_id: u64,
    pub attributes: BTreeMap<String, FieldValue>,
}

impl SourceEntity {
    pub fn new(entity_id: u64) -> Self {
        Self {
            entity_id,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.attributes.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.attributes.get(column)
    }
}

/// Identity of a derived record within the output table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub scope: Scope,
    pub entity_id: u64,
    pub field_key: String,
}

/// One definition expanded against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFieldValue {
    pub scope: Scope,
    pub entity_id: u64,
    pub field_key: String,
    pub value: FieldValue,
    pub display_name: String,
}

impl DerivedFieldValue {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            scope: self.scope,
            entity_id: self.entity_id,
            field_key: self.field_key.clone(),
        }
    }
}

/// Outcome of a committed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub definitions: usize,
    pub records_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_key_breaks_ties_on_field_key() {
        let scope = Scope::new(1, 10);
        let mut defs = vec![
            FieldDefinition::new(scope, "f9", "Size"),
            FieldDefinition::new(scope, "f2", "Size"),
            FieldDefinition::new(scope, "f1", "Severity"),
        ];
        defs.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let keys: Vec<_> = defs.iter().map(|d| d.field_key.as_str()).collect();
        assert_eq!(keys, vec!["f1", "f2", "f9"]);
    }

    #[test]
    fn test_entity_lookup_by_runtime_name() {
        let entity = SourceEntity::new(100).with("f1", "High").with("f2", json!(3));
        assert_eq!(entity.get("f1"), Some(&json!("High")));
        assert_eq!(entity.get("f2"), Some(&json!(3)));
        assert_eq!(entity.get("missing"), None);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::new(1, 10).to_string(), "1/10");
    }
}
