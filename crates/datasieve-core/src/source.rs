//! Loader boundary: anything that yields chunks in stream order.
use arrow::{datatypes::SchemaRef, error::ArrowError, record_batch::RecordBatch};

use crate::{chunk::Chunk, errors::CoreError};

pub trait ChunkSource: Iterator<Item = Result<Chunk, CoreError>> + Send {
    fn schema(&self) -> SchemaRef;

    /// Row count when it is cheap to know up front.
    fn total_rows(&self) -> Option<u64> {
        None
    }
}

/// Splits record batches into chunks of at most `chunk_size` rows and
/// numbers rows across the whole stream.
pub struct Rechunker<I> {
    batches: I,
    chunk_size: usize,
    pending: Option<RecordBatch>,
    position: usize,
    offset: u64,
}

impl<I> Rechunker<I>
where
    I: Iterator<Item = Result<RecordBatch, ArrowError>>,
{
    pub fn new(batches: I, chunk_size: usize) -> Self {
        Self {
            batches,
            chunk_size: chunk_size.max(1),
            pending: None,
            position: 0,
            offset: 0,
        }
    }

    /// Rows emitted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<I> Iterator for Rechunker<I>
where
    I: Iterator<Item = Result<RecordBatch, ArrowError>>,
{
    type Item = Result<Chunk, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = &self.pending {
                if self.position < batch.num_rows() {
                    let len = self.chunk_size.min(batch.num_rows() - self.position);
                    let slice = batch.slice(self.position, len);
                    self.position += len;
                    let chunk = Chunk::new(slice, self.offset);
                    self.offset += len as u64;
                    return Some(Ok(chunk));
                }
                self.pending = None;
            }
            match self.batches.next()? {
                Ok(batch) => {
                    self.pending = Some(batch);
                    self.position = 0;
                }
                Err(e) => return Some(Err(CoreError::from(e))),
            }
        }
    }
}

/// Chunks over batches already in memory.
pub struct BatchSource {
    schema: SchemaRef,
    total_rows: u64,
    inner: Rechunker<std::vec::IntoIter<Result<RecordBatch, ArrowError>>>,
}

impl BatchSource {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>, chunk_size: usize) -> Self {
        let total_rows = batches.iter().map(|b| b.num_rows() as u64).sum();
        let batches: Vec<Result<RecordBatch, ArrowError>> = batches.into_iter().map(Ok).collect();
        Self {
            schema,
            total_rows,
            inner: Rechunker::new(batches.into_iter(), chunk_size),
        }
    }

    /// Uses the schema of the first batch.
    pub fn from_batches(batches: Vec<RecordBatch>, chunk_size: usize) -> Result<Self, CoreError> {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| CoreError::Data("no batches to read".to_string()))?;
        Ok(Self::new(schema, batches, chunk_size))
    }
}

impl Iterator for BatchSource {
    type Item = Result<Chunk, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl ChunkSource for BatchSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn total_rows(&self) -> Option<u64> {
        Some(self.total_rows)
    }
}
