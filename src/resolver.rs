//! Per-definition fan-out across the entities of a scope.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{DerivedFieldValue, FieldDefinition, FieldValue, Scope, SourceEntity};

/// Records produced for one definition, in entity order.
pub type RecordStream<'a, R> = BoxStream<'a, Result<R>>;

/// Expands one definition into one record per entity in scope.
///
/// A definition whose field key is not a column of the entity schema must
/// fail with `SchemaMismatch` before any record is yielded. An empty entity
/// set yields an empty stream.
#[async_trait]
pub trait ExpansionResolver: Send + Sync {
    type Record: Send + Sync + 'static;

    async fn expand<'a>(
        &'a self,
        scope: Scope,
        definition: &FieldDefinition,
    ) -> Result<RecordStream<'a, Self::Record>>;
}

/// Project one entity through a definition.
///
/// The raw attribute is copied as-is. An absent attribute on a declared
/// column is a null value, not an error.
pub fn project(
    scope: Scope,
    definition: &FieldDefinition,
    entity: &SourceEntity,
) -> DerivedFieldValue {
    DerivedFieldValue {
        scope,
        entity_id: entity.entity_id,
        field_key: definition.field_key.clone(),
        value: entity
            .get(&definition.field_key)
            .cloned()
            .unwrap_or(FieldValue::Null),
        display_name: definition.display_name.clone(),
    }
}
