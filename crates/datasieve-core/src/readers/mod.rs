//! File-backed chunk sources.
pub mod config;
pub mod csv;
pub mod parquet;

use std::path::Path;

pub use config::{ChunkSizer, FileFormat};
pub use csv::CsvSource;
pub use parquet::ParquetSource;

use tracing::debug;

use crate::{config::EngineConfig, errors::CoreError, source::ChunkSource};

/// Open a source for `path`, picking the reader from the file extension.
pub fn open_source(
    path: impl AsRef<Path>,
    columns: &[String],
    chunk_size: usize,
) -> Result<Box<dyn ChunkSource>, CoreError> {
    let path = path.as_ref();
    match FileFormat::from_path(path) {
        Some(FileFormat::Csv) => Ok(Box::new(CsvSource::open(path, columns, chunk_size)?)),
        Some(FileFormat::Parquet) => Ok(Box::new(ParquetSource::open(path, columns, chunk_size)?)),
        _ => Err(CoreError::config(format!(
            "unsupported file format: {}",
            path.display()
        ))),
    }
}

/// Rows per chunk for `path` under the engine's memory budget.
///
/// Falls back to the configured `chunk_size` when no budget is set. The
/// decoded row width is estimated from the file size and, for Parquet, the
/// row count in the footer.
pub fn tuned_chunk_size(path: &Path, config: &EngineConfig, active_rules: usize) -> usize {
    let Some(budget) = config.memory_budget_bytes else {
        return config.chunk_size;
    };
    let format = FileFormat::from_path(path).unwrap_or(FileFormat::InMemory);
    let file_size = std::fs::metadata(path).ok().map(|meta| meta.len());
    let total_rows = match format {
        FileFormat::Parquet => ParquetSource::row_count(path).ok(),
        _ => None,
    };
    let rows = ChunkSizer::default().chunk_rows(
        Some(budget),
        file_size,
        total_rows,
        format,
        active_rules,
    );
    debug!(
        path = %path.display(),
        budget,
        file_size,
        total_rows,
        active_rules,
        chunk_rows = rows,
        "tuned chunk size"
    );
    rows
}

/// Like [`open_source`], with the chunk size tuned by [`tuned_chunk_size`].
pub fn open_source_for(
    path: impl AsRef<Path>,
    columns: &[String],
    config: &EngineConfig,
    active_rules: usize,
) -> Result<Box<dyn ChunkSource>, CoreError> {
    let path = path.as_ref();
    open_source(path, columns, tuned_chunk_size(path, config, active_rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_csv(dir: &Path, rows: usize) -> std::path::PathBuf {
        let path = dir.join("wide.csv");
        let mut content = String::from("id,payload\n");
        for i in 0..rows {
            content.push_str(&format!("{i},{}\n", "x".repeat(200)));
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_configured_chunk_size_without_budget() {
        let dir = tempdir().unwrap();
        let path = write_csv(dir.path(), 10);
        let config = EngineConfig::builder().with_chunk_size(3).build().unwrap();
        assert_eq!(tuned_chunk_size(&path, &config, 4), 3);
    }

    #[test]
    fn test_budget_bounds_the_chunk() {
        let dir = tempdir().unwrap();
        let path = write_csv(dir.path(), 10);
        let small = EngineConfig::builder()
            .with_memory_budget(1 << 20)
            .build()
            .unwrap();
        assert_eq!(tuned_chunk_size(&path, &small, 1), config::MIN_CHUNK_ROWS);

        let large = EngineConfig::builder()
            .with_memory_budget(1 << 40)
            .build()
            .unwrap();
        assert_eq!(tuned_chunk_size(&path, &large, 1), config::MAX_CHUNK_ROWS);

        // More rules leave less room per chunk
        let medium = EngineConfig::builder()
            .with_memory_budget(4 << 30)
            .build()
            .unwrap();
        let few = tuned_chunk_size(&path, &medium, 1);
        let many = tuned_chunk_size(&path, &medium, 8);
        assert!(many < few, "{many} >= {few}");
    }

    #[test]
    fn test_open_source_for_uses_tuned_size() {
        let dir = tempdir().unwrap();
        let path = write_csv(dir.path(), 2_500);
        let config = EngineConfig::builder()
            .with_memory_budget(1 << 20)
            .build()
            .unwrap();
        let source = open_source_for(&path, &[], &config, 2).unwrap();
        let sizes: Vec<usize> = source.map(|chunk| chunk.unwrap().num_rows()).collect();
        assert_eq!(sizes, vec![1_000, 1_000, 500]);
    }
}
