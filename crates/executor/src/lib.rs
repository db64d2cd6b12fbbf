//! Plan executor adapter.
//!
//! Binds a compiled [`QueryPlan`] onto batch scanners of a [`Store`] and
//! returns a lazy, closeable stream of `(key, value)` entries. The adapter
//! owns the strategy-to-table mapping: the spatio-temporal strategy scans
//! the spatio-temporal index table, record-id lookups scan the record
//! table, and the attribute strategies run a two-phase pipeline over the
//! attribute index table and then the record table.
//!
//! The stream releases its scanner on exhaustion, on `close`, and on drop;
//! closing twice is a no-op.


use bytes::Bytes;
use common::{ByteRange, GtResult, TableSet};
use planner::{QueryPlan, StrategyTag, BAND_FINE_FILTER};
use std::collections::BTreeSet;
use store::{BatchScanner, Entry, Store};
use tracing::debug;

/// Bind a plan onto the store, returning the live entry stream.
///
/// An empty plan never touches the store. Phase-1 resources of the
/// attribute strategies are released before this function returns.
pub fn bind<S: Store>(
    plan: &QueryPlan,
    store: &S,
    tables: &TableSet,
) -> GtResult<EntryStream<S::Scanner>> {
    if plan.is_empty() {
        return Ok(EntryStream::empty());
    }
    debug!(strategy = ?plan.strategy, ranges = plan.ranges.len(), "binding plan");
    match plan.strategy {
        StrategyTag::StIdx => {
            let scanner = configure(store, &tables.st_index, plan, &plan.ranges, |_| true)?;
            Ok(EntryStream::new(scanner))
        }
        StrategyTag::RecordId => {
            let scanner = configure(store, &tables.records, plan, &plan.ranges, |_| true)?;
            Ok(EntryStream::new(scanner))
        }
        StrategyTag::AttrEq | StrategyTag::AttrRange | StrategyTag::AttrLike => {
            bind_two_phase(plan, store, tables)
        }
    }
}

/// Phase 1 scans the attribute index with the plan's ranges and every stage
/// below the fine-filter band; the record ids ride in the column families.
/// Phase 2 resolves the collected ids against the record table under the
/// remaining stages.
fn bind_two_phase<S: Store>(
    plan: &QueryPlan,
    store: &S,
    tables: &TableSet,
) -> GtResult<EntryStream<S::Scanner>> {
    let mut phase1 = configure(store, &tables.attr_index, plan, &plan.ranges, |priority| {
        priority < BAND_FINE_FILTER
    })?;
    let mut ids: BTreeSet<Bytes> = BTreeSet::new();
    let collected = (|| -> GtResult<()> {
        while let Some(entry) = phase1.next_entry()? {
            ids.insert(entry.cf);
        }
        Ok(())
    })();
    phase1.close();
    collected?;
    debug!(ids = ids.len(), "collected record ids");

    if ids.is_empty() {
        return Ok(EntryStream::empty());
    }
    let id_ranges: Vec<ByteRange> = ids.iter().map(|id| ByteRange::single_row(id)).collect();
    let phase2 = configure(store, &tables.records, plan, &id_ranges, |priority| {
        priority >= BAND_FINE_FILTER
    })?;
    Ok(EntryStream::new(phase2))
}

fn configure<S: Store>(
    store: &S,
    table: &str,
    plan: &QueryPlan,
    ranges: &[ByteRange],
    keep: impl Fn(u16) -> bool,
) -> GtResult<S::Scanner> {
    let mut scanner = store.batch_scanner(table)?;
    scanner.set_ranges(ranges.to_vec());
    for cf in &plan.column_families {
        scanner.fetch_column_family(cf.clone());
    }
    for stage in plan.iterators.iter().filter(|s| keep(s.priority)) {
        scanner.add_scan_iterator(stage.priority, &stage.name, &stage.class_name, &stage.options)?;
    }
    Ok(scanner)
}

/// Lazy, closeable stream of scan entries.
///
/// The underlying scanner is released when the stream is exhausted, when
/// `close` is called, or when the stream is dropped, whichever comes first.
pub struct EntryStream<Sc: BatchScanner> {
    scanner: Option<Sc>,
}

impl<Sc: BatchScanner> EntryStream<Sc> {
    fn new(scanner: Sc) -> Self {
        Self {
            scanner: Some(scanner),
        }
    }

    /// A stream that was empty before it began.
    pub fn empty() -> Self {
        Self { scanner: None }
    }

    /// Release the scanner. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut scanner) = self.scanner.take() {
            scanner.close();
        }
    }
}

impl<Sc: BatchScanner> Iterator for EntryStream<Sc> {
    type Item = GtResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let scanner = self.scanner.as_mut()?;
        match scanner.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.close();
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl<Sc: BatchScanner> Drop for EntryStream<Sc> {
    fn drop(&mut self) {
        self.close();
    }
}
