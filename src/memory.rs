//! In-process storage backend.
//!
//! Holds definitions, entities and derived output behind one lock and
//! implements every storage-facing trait of the pipeline. Replaces are staged
//! in the handle and swapped in on commit, so readers see either the old or
//! the new output for a scope, never a mixture.
//!
//! Also carries the fault hooks the test suite uses: failing definition reads
//! part way through, failing writes and commits, raising shutdown after a number of
//! expansions, and a log of expansion order.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, RwLock};

use crate::error::{EnrichError, Result};
use crate::resolver::{project, ExpansionResolver, RecordStream};
use crate::sink::ReplaceSink;
use crate::source::{sort_definitions, DefinitionStream, FieldDefinitionSource};
use crate::types::{DerivedFieldValue, FieldDefinition, RecordKey, Scope, SourceEntity};

/// Table name reported in schema mismatches.
const ENTITY_TABLE: &str = "memory entities";

#[derive(Debug, Clone)]
struct StoredDefinition {
    definition: FieldDefinition,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    columns: BTreeSet<String>,
    definitions: Vec<StoredDefinition>,
    entities: BTreeMap<Scope, BTreeMap<u64, SourceEntity>>,
    output: BTreeMap<Scope, Vec<DerivedFieldValue>>,
    expansions: Vec<String>,
    fail_definitions_after: Option<usize>,
    fail_writes_after: Option<usize>,
    writes: usize,
    fail_commit: bool,
    /// Expansion count at which the sender is set to `true`.
    cancel_at: Option<(usize, watch::Sender<bool>)>,
}

/// Cloneable handle to one shared in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    open_cursors: Arc<AtomicUsize>,
}

/// Staged replace for one scope.
#[derive(Debug)]
pub struct MemoryReplace {
    scope: Scope,
    staged: Vec<DerivedFieldValue>,
    keys: HashSet<RecordKey>,
}

/// Counts a live definition cursor until dropped.
struct CursorGuard(Arc<AtomicUsize>);

impl CursorGuard {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose entity schema has the given columns.
    pub fn with_columns<I, C>(columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let state = MemoryState {
            columns: columns.into_iter().map(Into::into).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            open_cursors: Arc::default(),
        }
    }

    pub async fn add_column(&self, column: impl Into<String>) {
        self.state.write().await.columns.insert(column.into());
    }

    pub async fn drop_column(&self, column: &str) {
        self.state.write().await.columns.remove(column);
    }

    /// Insert or overwrite a definition, keyed by `(scope, field_key)`.
    pub async fn put_definition(&self, definition: FieldDefinition) {
        let mut state = self.state.write().await;
        state.definitions.retain(|stored| {
            stored.definition.scope != definition.scope
                || stored.definition.field_key != definition.field_key
        });
        state.definitions.push(StoredDefinition {
            definition,
            deleted: false,
        });
    }

    /// Soft-delete a definition. Returns whether it existed.
    pub async fn delete_definition(&self, scope: Scope, field_key: &str) -> bool {
        let mut state = self.state.write().await;
        let mut found = false;
        for stored in state.definitions.iter_mut() {
            if stored.definition.scope == scope && stored.definition.field_key == field_key {
                stored.deleted = true;
                found = true;
            }
        }
        found
    }

    /// Insert or overwrite an entity, keyed by `(scope, entity_id)`.
    pub async fn put_entity(&self, scope: Scope, entity: SourceEntity) {
        self.state
            .write()
            .await
            .entities
            .entry(scope)
            .or_default()
            .insert(entity.entity_id, entity);
    }

    pub async fn remove_entity(&self, scope: Scope, entity_id: u64) -> Option<SourceEntity> {
        self.state
            .write()
            .await
            .entities
            .get_mut(&scope)
            .and_then(|entities| entities.remove(&entity_id))
    }

    /// Overwrite the committed output of a scope directly, bypassing a run.
    pub async fn seed_output(&self, scope: Scope, records: Vec<DerivedFieldValue>) {
        self.state.write().await.output.insert(scope, records);
    }

    /// Committed output of a scope in write order.
    pub async fn output(&self, scope: Scope) -> Vec<DerivedFieldValue> {
        self.state
            .read()
            .await
            .output
            .get(&scope)
            .cloned()
            .unwrap_or_default()
    }

    /// Field keys in the order they were expanded, across all runs.
    pub async fn expansion_log(&self) -> Vec<String> {
        self.state.read().await.expansions.clone()
    }

    /// Make every definition cursor fail after yielding `n` rows.
    pub async fn fail_definitions_after(&self, n: usize) {
        self.state.write().await.fail_definitions_after = Some(n);
    }

    /// Make sink writes fail once `n` batches have been accepted.
    pub async fn fail_writes_after(&self, n: usize) {
        let mut state = self.state.write().await;
        state.fail_writes_after = Some(n);
        state.writes = 0;
    }

    /// Make commits fail until faults are cleared.
    pub async fn fail_commit(&self) {
        self.state.write().await.fail_commit = true;
    }

    /// Send `true` on `shutdown` once `n` more expansions have started.
    pub async fn cancel_after_expansions(&self, n: usize, shutdown: watch::Sender<bool>) {
        let mut state = self.state.write().await;
        let at = state.expansions.len() + n;
        state.cancel_at = Some((at, shutdown));
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.write().await;
        state.fail_definitions_after = None;
        state.fail_writes_after = None;
        state.fail_commit = false;
        state.cancel_at = None;
    }

    /// Definition cursors not yet dropped.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }
}

impl FieldDefinitionSource for MemoryStore {
    fn list(&self, scope: Scope) -> DefinitionStream<'_> {
        let guard = CursorGuard::open(&self.open_cursors);
        let state = Arc::clone(&self.state);

        stream::once(async move {
            let state = state.read().await;
            let mut live: Vec<FieldDefinition> = state
                .definitions
                .iter()
                .filter(|stored| !stored.deleted && stored.definition.scope == scope)
                .map(|stored| stored.definition.clone())
                .collect();
            sort_definitions(&mut live);

            let mut rows: Vec<Result<FieldDefinition>> = live.into_iter().map(Ok).collect();
            if let Some(n) = state.fail_definitions_after {
                rows.truncate(n);
                rows.push(Err(EnrichError::source_read(format!(
                    "definition cursor lost after {n} rows"
                ))));
            }
            stream::iter(rows)
        })
        .flatten()
        .map(move |row| {
            let _ = &guard;
            row
        })
        .boxed()
    }
}

#[async_trait]
impl ExpansionResolver for MemoryStore {
    type Record = DerivedFieldValue;

    async fn expand<'a>(
        &'a self,
        scope: Scope,
        definition: &FieldDefinition,
    ) -> Result<RecordStream<'a, DerivedFieldValue>> {
        let mut state = self.state.write().await;
        state.expansions.push(definition.field_key.clone());
        if let Some((at, shutdown)) = &state.cancel_at {
            if state.expansions.len() >= *at {
                shutdown.send_replace(true);
            }
        }

        if !state.columns.contains(&definition.field_key) {
            return Err(EnrichError::schema_mismatch(
                definition.field_key.clone(),
                ENTITY_TABLE,
            ));
        }

        let records: Vec<Result<DerivedFieldValue>> = state
            .entities
            .get(&scope)
            .map(|entities| {
                entities
                    .values()
                    .map(|entity| Ok(project(scope, definition, entity)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(stream::iter(records).boxed())
    }
}

#[async_trait]
impl ReplaceSink<DerivedFieldValue> for MemoryStore {
    type Handle = MemoryReplace;

    async fn begin_replace(&self, scope: Scope) -> Result<MemoryReplace> {
        Ok(MemoryReplace {
            scope,
            staged: Vec::new(),
            keys: HashSet::new(),
        })
    }

    async fn write(&self, handle: &mut MemoryReplace, batch: &[DerivedFieldValue]) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if let Some(limit) = state.fail_writes_after {
                if state.writes >= limit {
                    return Err(EnrichError::write("injected write failure"));
                }
            }
            state.writes += 1;
        }

        for record in batch {
            if record.scope != handle.scope {
                return Err(EnrichError::write(format!(
                    "record for scope {} written to replace of {}",
                    record.scope, handle.scope
                )));
            }
            if !handle.keys.insert(record.key()) {
                return Err(EnrichError::write(format!(
                    "duplicate key ({}, {}, {})",
                    record.scope, record.entity_id, record.field_key
                )));
            }
            handle.staged.push(record.clone());
        }
        Ok(())
    }

    async fn commit(&self, handle: MemoryReplace) -> Result<u64> {
        let count = handle.staged.len() as u64;
        let mut state = self.state.write().await;
        if state.fail_commit {
            return Err(EnrichError::write("injected commit failure"));
        }
        state.output.insert(handle.scope, handle.staged);
        Ok(count)
    }

    async fn abort(&self, _handle: MemoryReplace) -> Result<()> {
        Ok(())
    }
}
