//! Tabular storage.
//!
//! The estimation core never touches files directly: it reads and writes
//! named tables through the `Store` trait. A table is a set of equally long
//! string columns, keyed by (normalized) header name.
//!
//! - `CsvStore`: one `<table>.csv` per table in a directory
//! - `MemoryStore`: in-process tables (tests, embedded drivers)
//!
//! `WriteGate` serializes writers that share a result key.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use csv::StringRecord;
use tracing::debug;

use crate::error::AppError;

/// Column name → cell values, all columns the same length.
pub type Columns = BTreeMap<String, Vec<String>>;

/// Number of rows in `columns` (0 when empty).
pub fn row_count(columns: &Columns) -> usize {
    columns.values().next().map_or(0, Vec::len)
}

pub trait Store: Send + Sync {
    fn has_table(&self, table: &str) -> bool;

    /// Read `expected` columns of `table`. Missing columns are a
    /// `ConfigurationIncomplete` error; extra columns are ignored.
    fn query(&self, table: &str, expected: &[&str]) -> Result<Columns, AppError>;

    /// Append rows to `table`, creating it if needed.
    fn update(&self, table: &str, columns: &Columns) -> Result<(), AppError>;
}

fn check_rectangular(table: &str, columns: &Columns) -> Result<usize, AppError> {
    let rows = row_count(columns);
    if let Some((name, col)) = columns.iter().find(|(_, c)| c.len() != rows) {
        return Err(AppError::shortfall(format!("{table}.{name}"), col.len(), rows));
    }
    Ok(rows)
}

fn select(table: &str, all: &Columns, expected: &[&str]) -> Result<Columns, AppError> {
    let mut out = Columns::new();
    for &name in expected {
        let col = all.get(name).ok_or_else(|| {
            AppError::config(format!("Table `{table}` is missing required column `{name}`."))
        })?;
        out.insert(name.to_string(), col.clone());
    }
    Ok(out)
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Directory of CSV files, one per table.
#[derive(Debug)]
pub struct CsvStore {
    dir: PathBuf,
    append: Mutex<()>,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            append: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    fn read_all(&self, table: &str) -> Result<Columns, AppError> {
        let path = self.path(table);
        let file = File::open(&path)
            .map_err(|e| AppError::io(format!("Failed to open table '{}': {e}", path.display())))?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::parse(format!("Failed to read headers of '{}': {e}", path.display())))?
            .iter()
            .map(normalize_header_name)
            .collect();

        let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for (idx, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                AppError::parse(format!("CSV parse error in '{}' line {}: {e}", path.display(), idx + 2))
            })?;
            for (c, column) in columns.iter_mut().enumerate() {
                column.push(record.get(c).unwrap_or("").to_string());
            }
        }
        debug!(table, rows = columns.first().map_or(0, Vec::len), "table read");
        Ok(headers.into_iter().zip(columns).collect())
    }
}

impl Store for CsvStore {
    fn has_table(&self, table: &str) -> bool {
        self.path(table).is_file()
    }

    fn query(&self, table: &str, expected: &[&str]) -> Result<Columns, AppError> {
        let all = self.read_all(table)?;
        select(table, &all, expected)
    }

    fn update(&self, table: &str, columns: &Columns) -> Result<(), AppError> {
        let rows = check_rectangular(table, columns)?;
        let _guard = self.append.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.path(table);
        let exists = path.is_file();
        // Existing files keep their column order.
        let order: Vec<String> = if exists {
            let mut reader = csv::Reader::from_path(&path)
                .map_err(|e| AppError::io(format!("Failed to open table '{}': {e}", path.display())))?;
            reader
                .headers()
                .map_err(|e| AppError::parse(format!("Failed to read headers of '{}': {e}", path.display())))?
                .iter()
                .map(normalize_header_name)
                .collect()
        } else {
            columns.keys().cloned().collect()
        };
        if let Some(missing) = order.iter().find(|name| !columns.contains_key(*name)) {
            return Err(AppError::config(format!(
                "Update of table `{table}` is missing column `{missing}`."
            )));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::io(format!("Failed to open table '{}' for append: {e}", path.display())))?;
        let mut writer = csv::Writer::from_writer(file);
        let write_err = |e: csv::Error| AppError::io(format!("Failed to write table '{}': {e}", path.display()));
        if !exists {
            writer.write_record(&order).map_err(write_err)?;
        }
        for r in 0..rows {
            let record: StringRecord = order.iter().map(|name| columns[name][r].as_str()).collect();
            writer.write_record(&record).map_err(write_err)?;
        }
        writer
            .flush()
            .map_err(|e| AppError::io(format!("Failed to flush table '{}': {e}", path.display())))?;
        debug!(table, rows, "table appended");
        Ok(())
    }
}

/// Tables held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Columns>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a whole table.
    pub fn insert(&self, table: &str, columns: Columns) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), columns);
    }

    /// Build a table from a header and rows of cells.
    pub fn insert_rows(&self, table: &str, header: &[&str], rows: &[Vec<&str>]) {
        let columns: Columns = header
            .iter()
            .enumerate()
            .map(|(c, name)| {
                let cells = rows.iter().map(|row| row.get(c).copied().unwrap_or("").to_string());
                (name.to_string(), cells.collect())
            })
            .collect();
        self.insert(table, columns);
    }
}

impl Store for MemoryStore {
    fn has_table(&self, table: &str) -> bool {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(table)
    }

    fn query(&self, table: &str, expected: &[&str]) -> Result<Columns, AppError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let all = tables
            .get(table)
            .ok_or_else(|| AppError::config(format!("Table `{table}` does not exist.")))?;
        select(table, all, expected)
    }

    fn update(&self, table: &str, columns: &Columns) -> Result<(), AppError> {
        check_rectangular(table, columns)?;
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tables.entry(table.to_string()).or_default();
        if entry.is_empty() {
            *entry = columns.clone();
            return Ok(());
        }
        if entry.keys().ne(columns.keys()) {
            return Err(AppError::config(format!(
                "Update of table `{table}` does not match its columns."
            )));
        }
        for (name, values) in columns {
            if let Some(col) = entry.get_mut(name) {
                col.extend(values.iter().cloned());
            }
        }
        Ok(())
    }
}

/// Identity of a persisted result: parameter configuration plus run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WriteKey {
    pub config: String,
    pub run: String,
}

impl WriteKey {
    pub fn new(config: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            run: run.into(),
        }
    }
}

/// Per-key write locks: at most one writer per key at a time.
#[derive(Debug, Default)]
pub struct WriteGate {
    locks: Mutex<HashMap<WriteKey, Arc<Mutex<()>>>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &WriteKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Run `write` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &WriteKey, write: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        write()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn cols(pairs: &[(&str, &[&str])]) -> Columns {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn csv_store_reads_requested_columns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("species.csv"),
            "\u{feff}Name, Guild ,extra\ncod,groundfish,x\nherring,pelagic,y\n",
        )
        .unwrap();
        let store = CsvStore::new(dir.path());
        assert!(store.has_table("species"));
        assert!(!store.has_table("catch"));

        let t = store.query("species", &["name", "guild"]).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t["name"], vec!["cod", "herring"]);
        assert_eq!(t["guild"], vec!["groundfish", "pelagic"]);

        let err = store.query("species", &["name", "weight"]).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationIncomplete(_)));
    }

    #[test]
    fn csv_store_appends_in_file_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        store
            .update("runs", &cols(&[("run", &["0"]), ("fitness", &["1.5"])]))
            .unwrap();
        store
            .update("runs", &cols(&[("fitness", &["0.5"]), ("run", &["1"])]))
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("runs.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["fitness,run", "1.5,0", "0.5,1"]);

        let bad = store.update("runs", &cols(&[("run", &["2"])]));
        assert!(bad.is_err());
    }

    #[test]
    fn ragged_update_is_rejected() {
        let store = MemoryStore::new();
        let err = store
            .update("t", &cols(&[("a", &["1", "2"]), ("b", &["1"])]))
            .unwrap_err();
        assert!(matches!(err, AppError::DataShortfall { .. }));
    }

    #[test]
    fn memory_store_round_trips_rows() {
        let store = MemoryStore::new();
        store.insert_rows("catch", &["entity", "year", "value"], &[vec!["cod", "2000", "10"]]);
        store
            .update("catch", &cols(&[("entity", &["cod"]), ("year", &["2001"]), ("value", &["12"])]))
            .unwrap();
        let t = store.query("catch", &["year", "value"]).unwrap();
        assert_eq!(t["year"], vec!["2000", "2001"]);
        assert_eq!(row_count(&t), 2);
        assert!(store.query("effort", &["year"]).is_err());
    }

    #[test]
    fn write_gate_serializes_same_key() {
        let gate = Arc::new(WriteGate::new());
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let active = Arc::clone(&active);
                let overlap = Arc::clone(&overlap);
                thread::spawn(move || {
                    gate.with_lock(&WriteKey::new("logistic", "run-0"), || {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(5));
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }
}
