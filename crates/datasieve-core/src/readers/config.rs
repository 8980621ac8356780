use std::path::Path;

pub const DEFAULT_CHUNK_ROWS: usize = 50_000;
pub const MIN_CHUNK_ROWS: usize = 1_000;
pub const MAX_CHUNK_ROWS: usize = 500_000;

/// Assumed decoded width of a row when nothing better is known.
const DEFAULT_ROW_BYTES: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Parquet,
    InMemory,
}

impl FileFormat {
    /// Detect format from file extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "csv" => Some(FileFormat::Csv),
            "parquet" => Some(FileFormat::Parquet),
            _ => None,
        }
    }

    /// Decoded size relative to the bytes on disk.
    pub fn expansion_factor(&self) -> u64 {
        match self {
            FileFormat::Csv => 3,
            FileFormat::Parquet => 5,
            FileFormat::InMemory => 1,
        }
    }
}

/// Picks a chunk size from what is known about the input.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    min_rows: usize,
    max_rows: usize,
    default_rows: usize,
    /// Share of the available memory one chunk may use, across all rules.
    memory_fraction: f64,
}

impl Default for ChunkSizer {
    fn default() -> Self {
        Self {
            min_rows: MIN_CHUNK_ROWS,
            max_rows: MAX_CHUNK_ROWS,
            default_rows: DEFAULT_CHUNK_ROWS,
            memory_fraction: 0.1,
        }
    }
}

impl ChunkSizer {
    /// Rows per chunk.
    ///
    /// Without a memory figure the default is used. Otherwise the decoded row
    /// width is estimated from the file size and row count, and every active
    /// rule is assumed to hold one extra copy of the chunk.
    pub fn chunk_rows(
        &self,
        available_memory: Option<u64>,
        file_size: Option<u64>,
        total_rows: Option<u64>,
        format: FileFormat,
        active_rules: usize,
    ) -> usize {
        let Some(memory) = available_memory else {
            return self.default_rows.clamp(self.min_rows, self.max_rows);
        };
        let row_bytes = match (file_size, total_rows) {
            (Some(size), Some(rows)) if rows > 0 => {
                (size * format.expansion_factor()).div_ceil(rows).max(1)
            }
            _ => DEFAULT_ROW_BYTES * format.expansion_factor(),
        };
        let budget = (memory as f64 * self.memory_fraction) as u64;
        let copies = 1 + active_rules as u64;
        let rows = budget / (row_bytes * copies);
        (rows as usize).clamp(self.min_rows, self.max_rows)
    }
}
