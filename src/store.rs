use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// The tabs held by the backing store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    MasterList,
    PerformanceLog,
    UtilisationLog,
}

const MASTER_LIST_HEADER: &[&str] = &["Goal ID", "Resource Name", "Project", "Goal", "Year", "Month"];

const PERFORMANCE_LOG_HEADER: &[&str] = &[
    "Goal ID",
    "Resource Name",
    "Goal",
    "Status",
    "Rating",
    "Comments",
    "Recommended",
    "Justification",
    "Completion",
    "Revised Date",
    "Timestamp",
];

const UTILISATION_LOG_HEADER: &[&str] = &["Resource Name", "Project", "Year", "Month", "Type", "Timestamp"];

impl Table {
    pub const ALL: [Table; 3] = [Table::MasterList, Table::PerformanceLog, Table::UtilisationLog];

    /// Name of the tab as it appears in the workbook
    pub fn sheet_name(self) -> &'static str {
        match self {
            Table::MasterList => "Master_List",
            Table::PerformanceLog => "Performance_Log",
            Table::UtilisationLog => "Utilisation_Log",
        }
    }

    /// Canonical column names, in the order rows are written
    pub fn header(self) -> &'static [&'static str] {
        match self {
            Table::MasterList => MASTER_LIST_HEADER,
            Table::PerformanceLog => PERFORMANCE_LOG_HEADER,
            Table::UtilisationLog => UTILISATION_LOG_HEADER,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sheet_name())
    }
}

/// A string-typed tab together with the version stamp of the write that
/// produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub version: u64,
}

impl Sheet {
    /// A tab with the canonical header and no rows
    pub fn empty(table: Table) -> Self {
        Sheet {
            header: table.header().iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
            version: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched on trimmed name
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }
}

/// Failures of the backing store, kept apart so that callers can tell an
/// outage from a conflict from bad data.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("{table} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        table: Table,
        expected: u64,
        found: u64,
    },

    #[error("{table} is missing expected column '{column}'")]
    SchemaMismatch { table: Table, column: String },

    #[error("{table} row {row}: {detail}")]
    MalformedRow {
        table: Table,
        row: usize,
        detail: String,
    },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Access to the tabs of the backing store.
///
/// Writes are optimistic: the caller passes the version it read, and the
/// write is rejected with [`StoreError::Conflict`] if anybody wrote the tab
/// in between.
pub trait TableStore: Send + Sync {
    fn read(&self, table: Table) -> Result<Sheet, StoreError>;

    /// Reads a tab from the backing store itself, skipping any cache layered
    /// in front of it.
    fn read_fresh(&self, table: Table) -> Result<Sheet, StoreError> {
        self.read(table)
    }

    /// Appends rows to the end of a tab. Returns the new version.
    fn append(
        &self,
        table: Table,
        expected_version: u64,
        rows: Vec<Vec<String>>,
    ) -> Result<u64, StoreError>;

    /// Overwrites every data row of a tab. Returns the new version.
    fn replace(
        &self,
        table: Table,
        expected_version: u64,
        rows: Vec<Vec<String>>,
    ) -> Result<u64, StoreError>;
}

impl<S: TableStore + ?Sized> TableStore for Box<S> {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        (**self).read(table)
    }

    fn read_fresh(&self, table: Table) -> Result<Sheet, StoreError> {
        (**self).read_fresh(table)
    }

    fn append(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        (**self).append(table, expected_version, rows)
    }

    fn replace(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        (**self).replace(table, expected_version, rows)
    }
}

impl<S: TableStore + ?Sized> TableStore for Arc<S> {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        (**self).read(table)
    }

    fn read_fresh(&self, table: Table) -> Result<Sheet, StoreError> {
        (**self).read_fresh(table)
    }

    fn append(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        (**self).append(table, expected_version, rows)
    }

    fn replace(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        (**self).replace(table, expected_version, rows)
    }
}

fn check_version(table: Table, sheet: &Sheet, expected: u64) -> Result<(), StoreError> {
    if sheet.version != expected {
        return Err(StoreError::Conflict {
            table,
            expected,
            found: sheet.version,
        });
    }
    Ok(())
}

fn check_widths(table: Table, sheet: &Sheet, first_row: usize, rows: &[Vec<String>]) -> Result<(), StoreError> {
    for (offset, row) in rows.iter().enumerate() {
        if row.len() > sheet.header.len() {
            return Err(StoreError::MalformedRow {
                table,
                row: first_row + offset,
                detail: format!("{} cells for {} columns", row.len(), sheet.header.len()),
            });
        }
    }
    Ok(())
}

fn apply_append(table: Table, sheet: &mut Sheet, expected: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
    check_version(table, sheet, expected)?;
    check_widths(table, sheet, sheet.rows.len() + 1, &rows)?;
    sheet.rows.extend(rows);
    sheet.version += 1;
    Ok(sheet.version)
}

fn apply_replace(table: Table, sheet: &mut Sheet, expected: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
    check_version(table, sheet, expected)?;
    check_widths(table, sheet, 1, &rows)?;
    sheet.rows = rows;
    sheet.version += 1;
    Ok(sheet.version)
}

/// File-backed workbook: one gzip-compressed bincode file per tab.
pub struct WorkbookStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl WorkbookStore {
    /// Opens the workbook in `dir`, creating the directory and any missing
    /// tab with its canonical header.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir)?;

        let store = WorkbookStore {
            dir,
            lock: Mutex::new(()),
        };
        for table in Table::ALL {
            if !store.path(table).exists() {
                info!("Creating tab {} in {}", table, store.dir.display());
                store.save(table, &Sheet::empty(table))?;
            }
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, table: Table) -> PathBuf {
        self.dir.join(format!("{}.bin.gz", table.sheet_name()))
    }

    fn load(&self, table: Table) -> Result<Sheet, StoreError> {
        let file = File::open(self.path(table))?;
        let decoder = GzDecoder::new(file);
        let mut reader = BufReader::new(decoder);

        deserialize_from(&mut reader)
            .map_err(|e| StoreError::Unavailable(format!("could not decode {}: {}", table, e)))
    }

    fn save(&self, table: Table, sheet: &Sheet) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
            let mut writer = BufWriter::new(encoder);

            serialize_into(&mut writer, sheet)
                .map_err(|e| StoreError::Unavailable(format!("could not encode {}: {}", table, e)))?;

            writer.flush()?;
            let encoder = writer.into_inner().map_err(|e| e.into_error())?;
            encoder.finish()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(table)).map_err(|e| StoreError::from(e.error))?;
        Ok(())
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.lock
            .lock()
            .map_err(|_| StoreError::Unavailable("workbook lock poisoned".to_string()))
    }
}

impl TableStore for WorkbookStore {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        let _guard = self.locked()?;
        let sheet = self.load(table)?;
        debug!("Read {} ({} rows, version {})", table, sheet.rows.len(), sheet.version);
        Ok(sheet)
    }

    fn append(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        let _guard = self.locked()?;
        let mut sheet = self.load(table)?;
        let count = rows.len();
        let version = apply_append(table, &mut sheet, expected_version, rows)?;
        self.save(table, &sheet)?;
        info!("Appended {} row(s) to {} (version {})", count, table, version);
        Ok(version)
    }

    fn replace(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        let _guard = self.locked()?;
        let mut sheet = self.load(table)?;
        let version = apply_replace(table, &mut sheet, expected_version, rows)?;
        self.save(table, &sheet)?;
        info!("Rewrote {} with {} row(s) (version {})", table, sheet.rows.len(), version);
        Ok(version)
    }
}

/// In-process store, used for tests and throwaway runs.
pub struct MemoryStore {
    sheets: Mutex<HashMap<Table, Sheet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let sheets = Table::ALL
            .into_iter()
            .map(|table| (table, Sheet::empty(table)))
            .collect();
        MemoryStore {
            sheets: Mutex::new(sheets),
        }
    }

    /// Puts a tab in place as-is, header included.
    pub fn load_sheet(&self, table: Table, sheet: Sheet) -> Result<(), StoreError> {
        self.locked()?.insert(table, sheet);
        Ok(())
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Table, Sheet>>, StoreError> {
        self.sheets
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TableStore for MemoryStore {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        let sheets = self.locked()?;
        Ok(sheets.get(&table).cloned().unwrap_or_else(|| Sheet::empty(table)))
    }

    fn append(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        let mut sheets = self.locked()?;
        let sheet = sheets.entry(table).or_insert_with(|| Sheet::empty(table));
        apply_append(table, sheet, expected_version, rows)
    }

    fn replace(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        let mut sheets = self.locked()?;
        let sheet = sheets.entry(table).or_insert_with(|| Sheet::empty(table));
        apply_replace(table, sheet, expected_version, rows)
    }
}
