//! Store interface and the in-memory sorted engine.
//!
//! The planner targets a BigTable-class store: sorted rows, range scans,
//! column-family fetches, and a server-side iterator stack. [`Store`] and
//! [`BatchScanner`] capture exactly that surface. [`MemoryStore`] is the
//! built-in engine used by tests and embedders: a sorted map per table. It
//! honours the band-zero row-regex prefilter so that plans carrying one are
//! exercised end to end; higher bands are recorded but left to the real
//! server-side implementations.

use bytes::Bytes;
use common::{ByteRange, GtError, GtResult};
use regex::bytes::Regex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// One `(key, value)` entry streamed back from a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub row: Bytes,
    pub cf: Bytes,
    pub value: Bytes,
}

/// Iterator stage options as installed on a scanner.
pub type StageOptions = BTreeMap<String, String>;

/// Priority band of the row-regex prefilter.
const ROW_REGEX_BAND: u16 = 0;

pub trait Store {
    type Scanner: BatchScanner;

    fn batch_scanner(&self, table: &str) -> GtResult<Self::Scanner>;
}

/// A configured batch scan over one table.
///
/// Configure with `set_ranges`, `fetch_column_family`, and
/// `add_scan_iterator`, then pull entries with `next_entry`. Within one
/// range, entries arrive in ascending byte order; across ranges no order is
/// promised. `close` is idempotent and a closed scanner yields no further
/// entries.
pub trait BatchScanner {
    fn set_ranges(&mut self, ranges: Vec<ByteRange>);

    fn fetch_column_family(&mut self, cf: Bytes);

    fn add_scan_iterator(
        &mut self,
        priority: u16,
        name: &str,
        class_name: &str,
        options: &StageOptions,
    ) -> GtResult<()>;

    fn next_entry(&mut self) -> GtResult<Option<Entry>>;

    fn close(&mut self);
}

type TableData = BTreeMap<(Vec<u8>, Vec<u8>), Vec<u8>>;

/// In-memory sorted store, keyed by `(row, column family)`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, TableData>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty table.
    pub fn create_table(&self, table: &str) {
        self.tables
            .write()
            .expect("store lock poisoned")
            .entry(table.to_string())
            .or_default();
    }

    /// Insert one entry, creating the table on first write.
    pub fn put(
        &self,
        table: &str,
        row: impl AsRef<[u8]>,
        cf: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) {
        self.tables
            .write()
            .expect("store lock poisoned")
            .entry(table.to_string())
            .or_default()
            .insert(
                (row.as_ref().to_vec(), cf.as_ref().to_vec()),
                value.as_ref().to_vec(),
            );
    }

    pub fn entry_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .expect("store lock poisoned")
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

impl Store for MemoryStore {
    type Scanner = MemoryScanner;

    fn batch_scanner(&self, table: &str) -> GtResult<MemoryScanner> {
        let tables = self.tables.read().expect("store lock poisoned");
        let data = tables
            .get(table)
            .cloned()
            .ok_or_else(|| GtError::Store(format!("unknown table '{table}'")))?;
        Ok(MemoryScanner {
            table: table.to_string(),
            data,
            ranges: Vec::new(),
            families: Vec::new(),
            installed: Vec::new(),
            row_regex: None,
            results: None,
            closed: false,
        })
    }
}

/// Scanner over a snapshot of one in-memory table.
#[derive(Debug)]
pub struct MemoryScanner {
    table: String,
    data: TableData,
    ranges: Vec<ByteRange>,
    families: Vec<Bytes>,
    installed: Vec<(u16, String, String)>,
    row_regex: Option<Regex>,
    results: Option<std::vec::IntoIter<Entry>>,
    closed: bool,
}

impl MemoryScanner {
    /// The `(priority, name, class name)` triples installed so far.
    pub fn installed(&self) -> &[(u16, String, String)] {
        &self.installed
    }

    fn build_results(&self) -> Vec<Entry> {
        // Overlapping ranges must not duplicate entries; collect through a
        // sorted map keyed like the table itself.
        let mut matched: BTreeMap<(Vec<u8>, Vec<u8>), Vec<u8>> = BTreeMap::new();
        for range in &self.ranges {
            let start = Bound::Included((range.start.to_vec(), Vec::new()));
            let end = if range.end.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded((range.end.to_vec(), Vec::new()))
            };
            for ((row, cf), value) in self.data.range((start, end)) {
                if !self.families.is_empty()
                    && !self.families.iter().any(|f| f.as_ref() == cf.as_slice())
                {
                    continue;
                }
                if let Some(re) = &self.row_regex
                    && !re.is_match(row)
                {
                    continue;
                }
                matched.insert((row.clone(), cf.clone()), value.clone());
            }
        }
        matched
            .into_iter()
            .map(|((row, cf), value)| Entry {
                row: Bytes::from(row),
                cf: Bytes::from(cf),
                value: Bytes::from(value),
            })
            .collect()
    }
}

impl BatchScanner for MemoryScanner {
    fn set_ranges(&mut self, ranges: Vec<ByteRange>) {
        self.ranges = ranges;
        self.results = None;
    }

    fn fetch_column_family(&mut self, cf: Bytes) {
        self.families.push(cf);
        self.results = None;
    }

    fn add_scan_iterator(
        &mut self,
        priority: u16,
        name: &str,
        class_name: &str,
        options: &StageOptions,
    ) -> GtResult<()> {
        if priority == ROW_REGEX_BAND
            && let Some(pattern) = options.get("regex")
        {
            let re = Regex::new(pattern)
                .map_err(|e| GtError::Store(format!("invalid row regex '{pattern}': {e}")))?;
            self.row_regex = Some(re);
            self.results = None;
        }
        self.installed
            .push((priority, name.to_string(), class_name.to_string()));
        Ok(())
    }

    fn next_entry(&mut self) -> GtResult<Option<Entry>> {
        if self.closed {
            return Ok(None);
        }
        if self.results.is_none() {
            let entries = self.build_results();
            trace!(table = %self.table, entries = entries.len(), "materialized scan");
            self.results = Some(entries.into_iter());
        }
        Ok(self.results.as_mut().and_then(Iterator::next))
    }

    fn close(&mut self) {
        self.closed = true;
        self.results = None;
    }
}
