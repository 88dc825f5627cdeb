//! Replace-all persistence of derived records.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Scope;

/// Default number of records per bulk write.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Scope-wide replace of derived records.
///
/// Records present for the scope before `begin_replace` must not survive
/// `commit` unless written again through the handle. Nothing written through
/// the handle may be visible to readers before `commit`. Dropping a handle
/// without committing behaves like `abort`. A failed `commit` leaves the prior
/// state in place.
#[async_trait]
pub trait ReplaceSink<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    type Handle: Send;

    async fn begin_replace(&self, scope: Scope) -> Result<Self::Handle>;

    async fn write(&self, handle: &mut Self::Handle, batch: &[R]) -> Result<()>;

    /// Publish the replacement. Returns the number of records committed.
    async fn commit(&self, handle: Self::Handle) -> Result<u64>;

    async fn abort(&self, handle: Self::Handle) -> Result<()>;
}

/// Accumulates records into fixed-size batches in front of a sink.
pub struct BatchWriter<'s, R, K>
where
    R: Send + Sync + 'static,
    K: ReplaceSink<R>,
{
    sink: &'s K,
    handle: K::Handle,
    buffer: Vec<R>,
    batch_size: usize,
    written: u64,
}

impl<'s, R, K> BatchWriter<'s, R, K>
where
    R: Send + Sync + 'static,
    K: ReplaceSink<R>,
{
    pub fn new(sink: &'s K, handle: K::Handle, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            handle,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            written: 0,
        }
    }

    /// Buffer a record, writing a full batch when the buffer fills.
    pub async fn push(&mut self, record: R) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write whatever is buffered.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sink.write(&mut self.handle, &self.buffer).await?;
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Records handed to the sink so far (buffered records excluded).
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Commit the replace. Callers flush first so a failed final write can
    /// still be aborted.
    pub async fn commit(self) -> Result<u64> {
        debug_assert!(self.buffer.is_empty(), "commit with unflushed records");
        self.sink.commit(self.handle).await
    }

    /// Discard buffered records and roll back the replace.
    pub async fn abort(self) -> Result<()> {
        self.sink.abort(self.handle).await
    }
}
