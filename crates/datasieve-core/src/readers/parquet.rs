use std::{fs::File, path::Path};

use arrow::{datatypes::SchemaRef, record_batch::RecordBatchReader};
use parquet::{
    arrow::{
        ProjectionMask,
        arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
    },
    schema::types::SchemaDescriptor,
};

use crate::{
    chunk::Chunk,
    errors::CoreError,
    source::{ChunkSource, Rechunker},
};

/// Create a projection mask from column names.
/// An empty request keeps every column; unknown names are ignored.
fn create_projection_mask(schema: &SchemaDescriptor, cols: &[String]) -> ProjectionMask {
    if cols.is_empty() {
        return ProjectionMask::all();
    }
    let known: Vec<&str> = cols
        .iter()
        .map(String::as_str)
        .filter(|name| schema.columns().iter().any(|c| c.name() == *name))
        .collect();
    ProjectionMask::columns(schema, known)
}

/// Sequential streaming Parquet source. Memory stays at one decoded batch.
pub struct ParquetSource {
    schema: SchemaRef,
    total_rows: u64,
    inner: Rechunker<ParquetRecordBatchReader>,
}

impl ParquetSource {
    /// Row count from the file footer, without decoding any data.
    pub fn row_count(path: impl AsRef<Path>) -> Result<u64, CoreError> {
        let file = File::open(path.as_ref())?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
    }

    pub fn open(
        path: impl AsRef<Path>,
        columns: &[String],
        chunk_size: usize,
    ) -> Result<Self, CoreError> {
        let file = File::open(path.as_ref())?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let total_rows = builder.metadata().file_metadata().num_rows().max(0) as u64;
        let projection = create_projection_mask(builder.parquet_schema(), columns);

        let reader = builder
            .with_projection(projection)
            .with_batch_size(chunk_size.max(1))
            .build()?;
        Ok(Self {
            schema: reader.schema(),
            total_rows,
            inner: Rechunker::new(reader, chunk_size),
        })
    }
}

impl Iterator for ParquetSource {
    type Item = Result<Chunk, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl ChunkSource for ParquetSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn total_rows(&self) -> Option<u64> {
        Some(self.total_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ColumnAccessor;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    fn generate_test_parquet(path: &Path, n_rows: i64) {
        let ids: Vec<i64> = (1..=n_rows).collect();
        let names: Vec<String> = (1..=n_rows).map(|i| format!("User_{}", i)).collect();
        let values: Vec<f64> = (0..n_rows).map(|i| (i % 1000) as f64 * 0.01).collect();

        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(Int64Array::from(ids)) as Arc<dyn arrow::array::Array>),
            ("name", Arc::new(StringArray::from(names)) as Arc<dyn arrow::array::Array>),
            ("value", Arc::new(Float64Array::from(values)) as Arc<dyn arrow::array::Array>),
        ])
        .unwrap();

        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_parquet_source_all_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.parquet");
        generate_test_parquet(&path, 2_500);

        let source = ParquetSource::open(&path, &[], 1_000).unwrap();
        assert_eq!(source.total_rows(), Some(2_500));
        assert_eq!(source.schema().fields().len(), 3);
        let rows: usize = source.map(|c| c.unwrap().num_rows()).sum();
        assert_eq!(rows, 2_500);
    }

    #[test]
    fn test_parquet_source_projection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.parquet");
        generate_test_parquet(&path, 100);

        let mut source =
            ParquetSource::open(&path, &["value".to_string(), "missing".to_string()], 40).unwrap();
        assert_eq!(source.schema().fields().len(), 1);
        let first = source.next().unwrap().unwrap();
        assert_eq!(first.num_rows(), 40);
        let value = first.column("value").unwrap().value_as_f64(3).unwrap();
        assert!((value - 0.03).abs() < 1e-12);
        assert!(first.column("id").is_err());
    }
}
