//! Overflow storage for the key tracker.
//!
//! Stores are indexed by a stable 64-bit hash of the key, never by the raw
//! key, so composite or long keys do not bloat the index. Every lookup
//! confirms the candidate rows for a hash with an exact byte comparison,
//! which resolves hash collisions.
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::{errors::CoreError, utils::hasher::Xxh3Builder};

/// Inserts per transaction before the SQLite store commits.
const COMMIT_EVERY: usize = 10_000;

/// Key-value contract of a spillover store.
pub trait SpillStore: Send {
    /// Record a key that is known to be absent.
    fn insert(&mut self, hash: u64, key: &[u8], ordinal: u64) -> Result<(), CoreError>;

    /// Return the ordinal recorded for `key`, if any.
    fn lookup(&self, hash: u64, key: &[u8]) -> Result<Option<u64>, CoreError>;

    fn contains(&self, hash: u64, key: &[u8]) -> Result<bool, CoreError> {
        Ok(self.lookup(hash, key)?.is_some())
    }

    /// Reverse lookup, used to report reference keys never seen.
    fn key_for_ordinal(&self, ordinal: u64) -> Result<Option<Vec<u8>>, CoreError>;

    /// Number of keys held.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make pending writes durable.
    fn flush(&mut self) -> Result<(), CoreError>;

    /// Release the store. Backing files are removed unless configured to be kept.
    fn close(self: Box<Self>) -> Result<(), CoreError>;
}

/// Opens a store for a namespace. Lets callers plug their own backend.
pub trait SpillStoreFactory: Send + Sync {
    fn open(&self, namespace: &str) -> Result<Box<dyn SpillStore>, CoreError>;
}

/// Where a tracker spills once its in-memory bound is exceeded.
#[derive(Clone)]
pub enum SpillTarget {
    /// One SQLite database file per store under `dir`.
    Sqlite { dir: PathBuf, keep_files: bool },
    /// Hash-indexed in-process store.
    Memory,
    Custom(Arc<dyn SpillStoreFactory>),
}

impl fmt::Debug for SpillTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpillTarget::Sqlite { dir, keep_files } => f
                .debug_struct("Sqlite")
                .field("dir", dir)
                .field("keep_files", keep_files)
                .finish(),
            SpillTarget::Memory => write!(f, "Memory"),
            SpillTarget::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl SpillTarget {
    pub fn open(&self, namespace: &str) -> Result<Box<dyn SpillStore>, CoreError> {
        match self {
            SpillTarget::Sqlite { dir, keep_files } => Ok(Box::new(SqliteSpillStore::open(
                dir,
                namespace,
                *keep_files,
            )?)),
            SpillTarget::Memory => Ok(Box::new(MemorySpillStore::new())),
            SpillTarget::Custom(factory) => factory.open(namespace),
        }
    }
}

/// Encode `namespace` with characters that are safe inside an SQL
/// identifier and a file name.
///
/// ASCII alphanumerics are kept and every other byte is written as `_xx`,
/// so distinct namespaces never share an encoding.
pub fn sanitize_namespace(namespace: &str) -> String {
    if namespace.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(namespace.len());
    for byte in namespace.bytes() {
        if byte.is_ascii_alphanumeric() {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

/// SQLite-backed spill store.
///
/// Writes are grouped in a transaction; reads on the same connection see
/// uncommitted rows, so lookups stay exact between commits. A store that is
/// dropped without [`SpillStore::close`] still removes its files unless it
/// was opened to keep them.
pub struct SqliteSpillStore {
    conn: Option<Connection>,
    path: PathBuf,
    table: String,
    keep_file: bool,
    pending: usize,
    in_transaction: bool,
    len: u64,
}

impl SqliteSpillStore {
    /// Create an empty store for `namespace` inside `dir`.
    ///
    /// Leftovers from an earlier store under the same namespace are discarded.
    pub fn open(dir: &Path, namespace: &str, keep_file: bool) -> Result<Self, CoreError> {
        std::fs::create_dir_all(dir)?;
        let path = Self::file_for(dir, namespace);
        Self::remove_files(&path);
        Self::connect(path, namespace, keep_file, true)
    }

    /// Open the store a previous run kept for `namespace`, rows included.
    pub fn reopen(dir: &Path, namespace: &str, keep_file: bool) -> Result<Self, CoreError> {
        let path = Self::file_for(dir, namespace);
        if !path.exists() {
            return Err(CoreError::Store(format!(
                "no kept spill store at {}",
                path.display()
            )));
        }
        Self::connect(path, namespace, keep_file, false)
    }

    fn file_for(dir: &Path, namespace: &str) -> PathBuf {
        dir.join(format!("{}.spill.db", sanitize_namespace(namespace)))
    }

    fn connect(
        path: PathBuf,
        namespace: &str,
        keep_file: bool,
        fresh: bool,
    ) -> Result<Self, CoreError> {
        let table = format!("keys_{}", sanitize_namespace(namespace));

        let conn = Connection::open(&path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        if fresh {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
        }
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                hash INTEGER NOT NULL,
                key BLOB NOT NULL,
                ordinal INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"idx_{table}_hash\" ON \"{table}\" (hash);
            CREATE INDEX IF NOT EXISTS \"idx_{table}_ordinal\" ON \"{table}\" (ordinal);"
        ))?;
        let len: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;

        debug!(path = %path.display(), table = %table, existing = len, "opened spill store");
        Ok(Self {
            conn: Some(conn),
            path,
            table,
            keep_file,
            pending: 0,
            in_transaction: false,
            len: len as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<&Connection, CoreError> {
        self.conn
            .as_ref()
            .ok_or_else(|| CoreError::Store("spill store is closed".to_string()))
    }

    fn commit(&mut self) -> Result<(), CoreError> {
        if self.in_transaction {
            self.conn()?.execute_batch("COMMIT")?;
            self.in_transaction = false;
            self.pending = 0;
        }
        Ok(())
    }

    /// Commit, close the connection and remove the files unless kept.
    /// Files are removed even when the commit or close fails.
    fn release(&mut self) -> Result<(), CoreError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let committed = if self.in_transaction {
            conn.execute_batch("COMMIT").map_err(CoreError::from)
        } else {
            Ok(())
        };
        self.in_transaction = false;
        self.pending = 0;
        let closed = conn.close().map_err(|(_, e)| CoreError::from(e));
        if !self.keep_file {
            Self::remove_files(&self.path);
        }
        debug!(path = %self.path.display(), kept = self.keep_file, "closed spill store");
        committed.and(closed)
    }

    fn remove_files(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(file));
        }
    }
}

impl Drop for SqliteSpillStore {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.path.display(), error = %e, "failed to release spill store");
        }
    }
}

impl SpillStore for SqliteSpillStore {
    fn insert(&mut self, hash: u64, key: &[u8], ordinal: u64) -> Result<(), CoreError> {
        if !self.in_transaction {
            self.conn()?.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        let mut stmt = self.conn()?.prepare_cached(&format!(
            "INSERT INTO \"{}\" (hash, key, ordinal) VALUES (?1, ?2, ?3)",
            self.table
        ))?;
        stmt.execute(rusqlite::params![hash as i64, key, ordinal as i64])?;
        drop(stmt);

        self.len += 1;
        self.pending += 1;
        if self.pending >= COMMIT_EVERY {
            self.commit()?;
        }
        Ok(())
    }

    fn lookup(&self, hash: u64, key: &[u8]) -> Result<Option<u64>, CoreError> {
        let mut stmt = self.conn()?.prepare_cached(&format!(
            "SELECT key, ordinal FROM \"{}\" WHERE hash = ?1",
            self.table
        ))?;
        let mut rows = stmt.query([hash as i64])?;
        while let Some(row) = rows.next()? {
            let stored: Vec<u8> = row.get(0)?;
            // Same hash does not mean same key
            if stored == key {
                let ordinal: i64 = row.get(1)?;
                return Ok(Some(ordinal as u64));
            }
        }
        Ok(None)
    }

    fn key_for_ordinal(&self, ordinal: u64) -> Result<Option<Vec<u8>>, CoreError> {
        let mut stmt = self.conn()?.prepare_cached(&format!(
            "SELECT key FROM \"{}\" WHERE ordinal = ?1 LIMIT 1",
            self.table
        ))?;
        let mut rows = stmt.query([ordinal as i64])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn flush(&mut self) -> Result<(), CoreError> {
        self.commit()
    }

    fn close(mut self: Box<Self>) -> Result<(), CoreError> {
        self.release()
    }
}

/// In-process store with the same hash-indexed layout as the SQLite store.
#[derive(Default)]
pub struct MemorySpillStore {
    buckets: HashMap<u64, Vec<(Box<[u8]>, u64)>, Xxh3Builder>,
    len: u64,
}

impl MemorySpillStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillStore for MemorySpillStore {
    fn insert(&mut self, hash: u64, key: &[u8], ordinal: u64) -> Result<(), CoreError> {
        self.buckets
            .entry(hash)
            .or_default()
            .push((key.into(), ordinal));
        self.len += 1;
        Ok(())
    }

    fn lookup(&self, hash: u64, key: &[u8]) -> Result<Option<u64>, CoreError> {
        Ok(self.buckets.get(&hash).and_then(|bucket| {
            bucket
                .iter()
                .find(|(stored, _)| stored.as_ref() == key)
                .map(|(_, ordinal)| *ordinal)
        }))
    }

    fn key_for_ordinal(&self, ordinal: u64) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self
            .buckets
            .values()
            .flatten()
            .find(|(_, o)| *o == ordinal)
            .map(|(key, _)| key.to_vec()))
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn flush(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), CoreError> {
        Ok(())
    }
}
