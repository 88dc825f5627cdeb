//! Cursor converter
//!
//! Drives one enrichment run for a scope: streams the definitions in order,
//! expands each one across the scope's entities, and feeds the records into a
//! single replace-all write that is committed only if every step succeeded.
//!
//! Runs for different scopes share nothing and may proceed in parallel.
//! Callers must serialize runs for the same scope.

use futures::TryStreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{EnrichError, Result};
use crate::resolver::ExpansionResolver;
use crate::sink::{BatchWriter, ReplaceSink, DEFAULT_BATCH_SIZE};
use crate::source::FieldDefinitionSource;
use crate::types::{RunSummary, Scope};

pub struct CursorConverter<S, X, K> {
    source: S,
    resolver: X,
    sink: K,
    batch_size: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S, X, K> CursorConverter<S, X, K>
where
    S: FieldDefinitionSource,
    X: ExpansionResolver,
    K: ReplaceSink<X::Record>,
{
    pub fn new(source: S, resolver: X, sink: K) -> Self {
        Self {
            source,
            resolver,
            sink,
            batch_size: DEFAULT_BATCH_SIZE,
            shutdown: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Observe a shutdown channel; `true` cancels the run at the next
    /// definition boundary.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Replace the derived records of `scope` with a fresh expansion.
    ///
    /// Either the whole new set is committed or the prior output is left
    /// untouched (as far as the sink can roll back).
    pub async fn run(&self, scope: Scope) -> Result<RunSummary> {
        info!(
            connection_id = scope.connection_id,
            workspace_id = scope.workspace_id,
            batch_size = self.batch_size,
            "Starting custom field enrichment"
        );

        let handle = self.sink.begin_replace(scope).await?;
        let mut writer = BatchWriter::new(&self.sink, handle, self.batch_size);

        let definitions = match self.convert(scope, &mut writer).await {
            Ok(definitions) => definitions,
            Err(e) => return Err(abort(writer, scope, e).await),
        };

        // Last boundary: a cancel that arrives after the final definition
        // must still prevent the commit.
        if let Err(e) = self.check_cancelled() {
            return Err(abort(writer, scope, e).await);
        }

        let records_written = match writer.commit().await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    connection_id = scope.connection_id,
                    workspace_id = scope.workspace_id,
                    kind = e.kind(),
                    error = %e,
                    "Failed to commit custom field replace"
                );
                return Err(e);
            }
        };

        info!(
            connection_id = scope.connection_id,
            workspace_id = scope.workspace_id,
            definitions,
            records = records_written,
            "Committed custom field values"
        );

        Ok(RunSummary {
            definitions,
            records_written,
        })
    }

    /// Stream every definition through the resolver into the writer.
    /// The definition cursor is dropped on every return path.
    async fn convert(
        &self,
        scope: Scope,
        writer: &mut BatchWriter<'_, X::Record, K>,
    ) -> Result<usize> {
        let mut definitions = self.source.list(scope);
        let mut processed = 0usize;

        loop {
            self.check_cancelled()?;

            let Some(definition) = definitions.try_next().await? else {
                break;
            };

            let before = writer.written();
            let mut records = self.resolver.expand(scope, &definition).await?;
            while let Some(record) = records.try_next().await? {
                writer.push(record).await?;
            }
            drop(records);
            writer.flush().await?;

            debug!(
                field_key = %definition.field_key,
                display_name = %definition.display_name,
                records = writer.written() - before,
                "Expanded custom field"
            );
            processed += 1;
        }

        Ok(processed)
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.shutdown {
            Some(shutdown) if *shutdown.borrow() => Err(EnrichError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Roll back the in-flight replace and hand back the error that caused it.
async fn abort<R, K>(writer: BatchWriter<'_, R, K>, scope: Scope, cause: EnrichError) -> EnrichError
where
    R: Send + Sync + 'static,
    K: ReplaceSink<R>,
{
    warn!(
        connection_id = scope.connection_id,
        workspace_id = scope.workspace_id,
        kind = cause.kind(),
        error = %cause,
        "Aborting custom field enrichment"
    );

    if let Err(abort_err) = writer.abort().await {
        error!(
            connection_id = scope.connection_id,
            workspace_id = scope.workspace_id,
            error = %abort_err,
            "Failed to roll back custom field replace"
        );
    }

    cause
}
