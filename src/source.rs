//! Field definition discovery.

use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{FieldDefinition, Scope};

/// Ordered cursor over the definitions of one scope.
pub type DefinitionStream<'a> = BoxStream<'a, Result<FieldDefinition>>;

/// Yields the live custom-field definitions for a scope.
///
/// Implementations must order by display name ascending, field key breaking
/// ties, and must exclude soft-deleted and out-of-scope rows. A read error
/// mid-stream is yielded as an `Err` item and ends the run.
pub trait FieldDefinitionSource: Send + Sync {
    fn list(&self, scope: Scope) -> DefinitionStream<'_>;
}

/// Sort definitions into processing order.
pub fn sort_definitions(definitions: &mut [FieldDefinition]) {
    definitions.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_definitions_by_display_name() {
        let scope = Scope::new(1, 10);
        let mut defs = vec![
            FieldDefinition::new(scope, "f2", "Size"),
            FieldDefinition::new(scope, "f3", "Area"),
            FieldDefinition::new(scope, "f1", "Severity"),
        ];
        sort_definitions(&mut defs);

        let names: Vec<_> = defs.iter().map(|d| d.display_name.as_str()).collect();
        assert_eq!(names, vec!["Area", "Severity", "Size"]);
    }
}
