//! PostgreSQL backend
//!
//! Definitions are read through a row stream, entities through keyset pages,
//! and the replace runs inside one transaction: the scope's rows are deleted
//! and the new rows bulk-inserted, then committed together. Readers under
//! READ COMMITTED see either the old set or the new one.
//!
//! NOTE: All queries use runtime-checked sqlx::query() because the table and
//! column names are configured at run time.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use crate::config::{EnricherConfig, TableConfig};
use crate::converter::CursorConverter;
use crate::error::{EnrichError, Result};
use crate::resolver::{ExpansionResolver, RecordStream};
use crate::sink::ReplaceSink;
use crate::source::{DefinitionStream, FieldDefinitionSource};
use crate::sql;
use crate::types::{DerivedFieldValue, FieldDefinition, FieldValue, Scope};

/// Postgres has no unsigned integers; ids are stored as BIGINT.
fn scope_params(scope: Scope) -> Result<(i64, i64)> {
    let connection_id = i64::try_from(scope.connection_id).map_err(|_| {
        EnrichError::source_read(format!("connection id {} out of range", scope.connection_id))
    })?;
    let workspace_id = i64::try_from(scope.workspace_id).map_err(|_| {
        EnrichError::source_read(format!("workspace id {} out of range", scope.workspace_id))
    })?;
    Ok((connection_id, workspace_id))
}

/// Converter wired entirely to one pool.
pub type PgConverter = CursorConverter<PgFieldDefinitionSource, PgExpansionResolver, PgReplaceSink>;

/// Build a converter over `pool` from configuration.
pub fn converter(pool: PgPool, config: &EnricherConfig) -> Result<PgConverter> {
    config.validate()?;
    Ok(CursorConverter::new(
        PgFieldDefinitionSource::new(pool.clone(), &config.tables)?,
        PgExpansionResolver::new(pool.clone(), config.tables.clone(), config.batch_size)?,
        PgReplaceSink::new(pool, &config.tables)?,
    )
    .with_batch_size(config.batch_size))
}

// ============================================================================
// Definitions
// ============================================================================

#[derive(Debug, FromRow)]
struct DefinitionRow {
    field_key: String,
    display_name: String,
}

pub struct PgFieldDefinitionSource {
    pool: PgPool,
    list_sql: String,
}

impl PgFieldDefinitionSource {
    pub fn new(pool: PgPool, tables: &TableConfig) -> Result<Self> {
        Ok(Self {
            pool,
            list_sql: sql::list_definitions(tables)?,
        })
    }
}

impl FieldDefinitionSource for PgFieldDefinitionSource {
    fn list(&self, scope: Scope) -> DefinitionStream<'_> {
        let (connection_id, workspace_id) = match scope_params(scope) {
            Ok(params) => params,
            Err(e) => return stream::once(async move { Err::<FieldDefinition, _>(e) }).boxed(),
        };

        sqlx::query_as::<_, DefinitionRow>(&self.list_sql)
            .bind(connection_id)
            .bind(workspace_id)
            .fetch(&self.pool)
            .map(move |row| {
                row.map(|r| FieldDefinition::new(scope, r.field_key, r.display_name))
                    .map_err(EnrichError::source_read)
            })
            .boxed()
    }
}

// ============================================================================
// Expansion
// ============================================================================

pub struct PgExpansionResolver {
    pool: PgPool,
    tables: TableConfig,
    page_size: i64,
}

impl PgExpansionResolver {
    pub fn new(pool: PgPool, tables: TableConfig, page_size: usize) -> Result<Self> {
        // Reject bad configured names before the first run.
        sql::expand_page(&tables, &tables.entity_id_column)?;
        let page_size = i64::try_from(page_size.max(1))
            .map_err(|_| EnrichError::Config(format!("page size {page_size} out of range")))?;
        Ok(Self {
            pool,
            tables,
            page_size,
        })
    }

    /// Checked against the live schema on every expansion, so columns added
    /// or dropped between runs are seen by a long-lived resolver.
    async fn column_exists(&self, column: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(sql::COLUMN_EXISTS)
            .bind(&self.tables.schema)
            .bind(&self.tables.entities_table)
            .bind(column)
            .fetch_one(&self.pool)
            .await
            .map_err(EnrichError::source_read)?;
        debug!(
            table = %self.tables.entities_table,
            column,
            exists,
            "Checked entity column"
        );
        Ok(exists)
    }
}

/// `(entity_id, to_jsonb(column))` from one expansion page.
type PageRow = (i64, Option<FieldValue>);

struct PageCursor {
    pool: PgPool,
    sql: Arc<str>,
    connection_id: i64,
    workspace_id: i64,
    after: i64,
    page_size: i64,
    done: bool,
}

#[async_trait]
impl ExpansionResolver for PgExpansionResolver {
    type Record = DerivedFieldValue;

    async fn expand<'a>(
        &'a self,
        scope: Scope,
        definition: &FieldDefinition,
    ) -> Result<RecordStream<'a, DerivedFieldValue>> {
        if !self.column_exists(&definition.field_key).await? {
            return Err(EnrichError::schema_mismatch(
                definition.field_key.clone(),
                format!("{}.{}", self.tables.schema, self.tables.entities_table),
            ));
        }

        let (connection_id, workspace_id) = scope_params(scope)?;
        let cursor = PageCursor {
            pool: self.pool.clone(),
            sql: Arc::from(sql::expand_page(&self.tables, &definition.field_key)?),
            connection_id,
            workspace_id,
            after: i64::MIN,
            page_size: self.page_size,
            done: false,
        };

        let field_key = definition.field_key.clone();
        let display_name = definition.display_name.clone();

        let pages = stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return Ok::<_, EnrichError>(None);
            }
            let rows: Vec<PageRow> = sqlx::query_as(&cursor.sql)
                .bind(cursor.connection_id)
                .bind(cursor.workspace_id)
                .bind(cursor.after)
                .bind(cursor.page_size)
                .fetch_all(&cursor.pool)
                .await
                .map_err(EnrichError::source_read)?;

            cursor.done = (rows.len() as i64) < cursor.page_size;
            match rows.last() {
                Some((last, _)) => cursor.after = *last,
                None => return Ok(None),
            }
            Ok(Some((rows, cursor)))
        });

        let records = pages
            .map_ok(move |rows| {
                let field_key = field_key.clone();
                let display_name = display_name.clone();
                let to_record = move |(entity_id, value): PageRow| -> Result<DerivedFieldValue> {
                    let entity_id = u64::try_from(entity_id).map_err(|_| {
                        EnrichError::source_read(format!("negative entity id {entity_id}"))
                    })?;
                    Ok(DerivedFieldValue {
                        scope,
                        entity_id,
                        field_key: field_key.clone(),
                        value: value.unwrap_or(FieldValue::Null),
                        display_name: display_name.clone(),
                    })
                };
                stream::iter(rows.into_iter().map(to_record))
            })
            .try_flatten();

        Ok(records.boxed())
    }
}

// ============================================================================
// Replace sink
// ============================================================================

pub struct PgReplaceSink {
    pool: PgPool,
    delete_sql: String,
    insert_prefix: String,
}

/// Open replace: the transaction that cleared the scope.
pub struct PgReplace {
    tx: Transaction<'static, Postgres>,
    connection_id: i64,
    workspace_id: i64,
    written: u64,
}

impl PgReplaceSink {
    pub fn new(pool: PgPool, tables: &TableConfig) -> Result<Self> {
        Ok(Self {
            pool,
            delete_sql: sql::delete_scope(tables)?,
            insert_prefix: sql::insert_values_prefix(tables)?,
        })
    }
}

#[async_trait]
impl ReplaceSink<DerivedFieldValue> for PgReplaceSink {
    type Handle = PgReplace;

    async fn begin_replace(&self, scope: Scope) -> Result<PgReplace> {
        let (connection_id, workspace_id) = scope_params(scope)?;
        let mut tx = self.pool.begin().await.map_err(EnrichError::write)?;

        let cleared = sqlx::query(&self.delete_sql)
            .bind(connection_id)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await
            .map_err(EnrichError::write)?
            .rows_affected();

        debug!(connection_id, workspace_id, cleared, "Cleared prior custom field values");

        Ok(PgReplace {
            tx,
            connection_id,
            workspace_id,
            written: 0,
        })
    }

    async fn write(&self, handle: &mut PgReplace, batch: &[DerivedFieldValue]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let story_ids = batch
            .iter()
            .map(|r| {
                i64::try_from(r.entity_id).map_err(|_| {
                    EnrichError::write(format!("entity id {} out of range", r.entity_id))
                })
            })
            .collect::<Result<Vec<i64>>>()?;

        let (connection_id, workspace_id) = (handle.connection_id, handle.workspace_id);
        let mut builder = QueryBuilder::<Postgres>::new(&self.insert_prefix);
        builder.push_values(batch.iter().zip(story_ids), |mut row, (record, story_id)| {
            row.push_bind(connection_id)
                .push_bind(workspace_id)
                .push_bind(story_id)
                .push_bind(&record.field_key)
                .push_bind(&record.value)
                .push_bind(&record.display_name);
        });

        builder
            .build()
            .execute(&mut *handle.tx)
            .await
            .map_err(EnrichError::write)?;

        handle.written += batch.len() as u64;
        Ok(())
    }

    async fn commit(&self, handle: PgReplace) -> Result<u64> {
        let written = handle.written;
        handle.tx.commit().await.map_err(EnrichError::write)?;
        Ok(written)
    }

    async fn abort(&self, handle: PgReplace) -> Result<()> {
        handle.tx.rollback().await.map_err(EnrichError::write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_params_range() {
        assert_eq!(scope_params(Scope::new(1, 10)).unwrap(), (1, 10));
        let err = scope_params(Scope::new(u64::MAX, 10)).unwrap_err();
        assert!(err.to_string().contains("connection id"));
    }
}
