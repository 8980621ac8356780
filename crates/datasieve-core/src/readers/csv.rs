//! Sequential streaming CSV source.
//!
//! Every column is read as Utf8; typing happens lazily in the column
//! accessor, so a malformed value becomes a data failure instead of a
//! decode error.
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    sync::Arc,
};

use arrow::{
    csv::{Reader, ReaderBuilder},
    datatypes::{DataType, Field, Schema, SchemaRef},
};

use crate::{chunk::Chunk, errors::CoreError, source::ChunkSource, source::Rechunker};

/// Generate UTF-8 schema from CSV file header
fn csv_generate_schema(path: &Path) -> Result<Schema, io::Error> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    if let Some(first) = lines.next() {
        let header = first?;
        let fields: Vec<Field> = header
            .split(',')
            .map(|c| Field::new(c.trim().trim_matches('"'), DataType::Utf8, true))
            .collect();
        Ok(Schema::new(fields))
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "CSV file is empty",
        ))
    }
}

/// Calculate column projection indices. An empty request keeps every column.
fn csv_calculate_projection(schema: &Schema, requested_cols: &[String]) -> Vec<usize> {
    if requested_cols.is_empty() {
        return (0..schema.fields().len()).collect();
    }
    requested_cols
        .iter()
        .filter_map(|col_name| schema.column_with_name(col_name).map(|(idx, _)| idx))
        .collect()
}

pub struct CsvSource {
    schema: SchemaRef,
    inner: Rechunker<Reader<File>>,
}

impl CsvSource {
    /// Open `path` reading only `columns`. Requested columns missing from the
    /// file are left out and surface later as schema errors.
    pub fn open(
        path: impl AsRef<Path>,
        columns: &[String],
        chunk_size: usize,
    ) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let schema = Arc::new(csv_generate_schema(path)?);
        let projection = csv_calculate_projection(&schema, columns);

        let reader = ReaderBuilder::new(schema)
            .with_header(true)
            .with_projection(projection)
            .with_batch_size(chunk_size.max(1))
            .build(file)?;
        Ok(Self {
            schema: reader.schema(),
            inner: Rechunker::new(reader, chunk_size),
        })
    }
}

impl Iterator for CsvSource {
    type Item = Result<Chunk, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl ChunkSource for CsvSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}
