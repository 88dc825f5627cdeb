//! SQL text for the Postgres backend.
//!
//! Table and column names come from configuration and from definition rows,
//! so they are quoted here rather than bound. Values are always bound.

use crate::config::TableConfig;
use crate::error::{EnrichError, Result};

/// Quote an identifier for Postgres, doubling embedded quotes.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(EnrichError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn qualified(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

/// Live definitions of a scope in processing order. Binds `$1` connection,
/// `$2` workspace.
pub fn list_definitions(tables: &TableConfig) -> Result<String> {
    let field = quote_ident(&tables.definition_field_column)?;
    let name = quote_ident(&tables.definition_name_column)?;
    let deleted = match &tables.definition_deleted_column {
        Some(column) => format!(" AND {} IS NULL", quote_ident(column)?),
        None => String::new(),
    };
    Ok(format!(
        "SELECT {field} AS field_key, {name} AS display_name \
         FROM {table} \
         WHERE connection_id = $1 AND workspace_id = $2{deleted} \
         ORDER BY {name} ASC, {field} ASC",
        table = qualified(&tables.schema, &tables.definitions_table)?,
    ))
}

/// Whether a column exists. Binds `$1` schema, `$2` table, `$3` column.
pub const COLUMN_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 AND column_name = $3)";

/// One keyset page of the expansion scan for `field_key`. Binds `$1`
/// connection, `$2` workspace, `$3` last entity id seen, `$4` page size.
pub fn expand_page(tables: &TableConfig, field_key: &str) -> Result<String> {
    let id = quote_ident(&tables.entity_id_column)?;
    Ok(format!(
        "SELECT {id} AS entity_id, to_jsonb({column}) AS custom_value \
         FROM {table} \
         WHERE connection_id = $1 AND workspace_id = $2 AND {id} > $3 \
         ORDER BY {id} ASC \
         LIMIT $4",
        column = quote_ident(field_key)?,
        table = qualified(&tables.schema, &tables.entities_table)?,
    ))
}

/// Clear a scope's output. Binds `$1` connection, `$2` workspace.
pub fn delete_scope(tables: &TableConfig) -> Result<String> {
    Ok(format!(
        "DELETE FROM {} WHERE connection_id = $1 AND workspace_id = $2",
        qualified(&tables.schema, &tables.output_table)?
    ))
}

/// Head of the bulk insert; rows are appended with `push_values`.
pub fn insert_values_prefix(tables: &TableConfig) -> Result<String> {
    Ok(format!(
        "INSERT INTO {} (connection_id, workspace_id, story_id, custom_field, custom_value, name) ",
        qualified(&tables.schema, &tables.output_table)?
    ))
}
