//! Key and column-family planning over the spatio-temporal index table.
//!
//! The index key layout is owned by a [`KeySchema`] implementation; the
//! planner only sees the artifacts: row-key ranges, an optional row regex,
//! and a column-family plan. [`GridKeySchema`] is the built-in layout:
//! cell-major row keys over a fixed 45-degree grid with day-resolution date
//! digits, and month-bucket column families.


use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use common::{ByteRange, GtResult};
use spacetime::{Bounds, KeyPlanningFilter};
use tracing::debug;

/// How to walk the row-key space for one query.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyPlan {
    /// Scan these ranges; `regex`, when present, is a sound row prefilter
    /// (it may pass extra rows, never drop a matching one).
    Ranges {
        ranges: Vec<ByteRange>,
        regex: Option<String>,
    },
    /// Fetch exactly these row keys.
    List(Vec<Bytes>),
    /// Scan the whole table.
    AcceptAll,
}

impl KeyPlan {
    pub fn to_regex(&self) -> Option<&str> {
        match self {
            Self::Ranges { regex, .. } => regex.as_deref(),
            Self::List(_) | Self::AcceptAll => None,
        }
    }

    /// Materialize as scan ranges: a key list becomes single-row ranges and
    /// accept-all the one full-coverage range.
    pub fn into_ranges(self) -> Vec<ByteRange> {
        match self {
            Self::Ranges { ranges, .. } => ranges,
            Self::List(keys) => keys.iter().map(|k| ByteRange::single_row(k)).collect(),
            Self::AcceptAll => vec![ByteRange::all()],
        }
    }
}

/// Which column families to fetch.
#[derive(Clone, Debug, PartialEq)]
pub enum CfPlan {
    List(Vec<Bytes>),
    All,
}

/// The on-disk key layout seam. Implementations expand a space-time
/// predicate into the byte-level artifacts the scanner needs.
pub trait KeySchema {
    fn key_plan(&self, f: &KeyPlanningFilter) -> GtResult<KeyPlan>;
    fn column_families(&self, f: &KeyPlanningFilter) -> CfPlan;
    /// The layout grammar text, passed to the coarse intersect iterator.
    fn describe(&self) -> String;
}

/// Built-in cell-major key layout.
///
/// Row key: `cell (2 hex digits) || yyyymmdd || 0x00 || feature id`, where
/// `cell` indexes a fixed 8x4 grid of 45-degree lon/lat bands. Column
/// family: `yyyymm` month bucket.
#[derive(Clone, Copy, Debug, Default)]
pub struct GridKeySchema;

const LON_BANDS: u8 = 8;
const LAT_BANDS: u8 = 4;
const CELL_COUNT: u8 = LON_BANDS * LAT_BANDS;
/// Month buckets stop paying for themselves past this many.
const MAX_CF_BUCKETS: usize = 120;

impl GridKeySchema {
    /// Grid cell containing a lon/lat position.
    pub fn cell_of(lon: f64, lat: f64) -> u8 {
        let lon_band = (((lon + 180.0) / 45.0).floor() as i32).clamp(0, LON_BANDS as i32 - 1);
        let lat_band = (((lat + 90.0) / 45.0).floor() as i32).clamp(0, LAT_BANDS as i32 - 1);
        lat_band as u8 * LON_BANDS + lon_band as u8
    }

    /// The full row key for a feature, as written by the ingest path.
    pub fn row_key(lon: f64, lat: f64, time: DateTime<Utc>, id: &str) -> Bytes {
        let mut key = Vec::with_capacity(11 + id.len());
        key.extend_from_slice(cell_prefix(Self::cell_of(lon, lat)).as_bytes());
        key.extend_from_slice(day_digits(time.date_naive()).as_bytes());
        key.push(0x00);
        key.extend_from_slice(id.as_bytes());
        Bytes::from(key)
    }

    /// The month-bucket column family for a feature's timestamp.
    pub fn column_family(time: DateTime<Utc>) -> Bytes {
        Bytes::from(format!("{:04}{:02}", time.year(), time.month()))
    }

    fn cells_for(bounds: &Bounds) -> Vec<u8> {
        let lon_lo = Self::cell_of(bounds.min_x(), bounds.min_y()) % LON_BANDS;
        let lon_hi = Self::cell_of(bounds.max_x(), bounds.min_y()) % LON_BANDS;
        let lat_lo = Self::cell_of(bounds.min_x(), bounds.min_y()) / LON_BANDS;
        let lat_hi = Self::cell_of(bounds.min_x(), bounds.max_y()) / LON_BANDS;
        let mut cells = Vec::new();
        for lat in lat_lo..=lat_hi {
            for lon in lon_lo..=lon_hi {
                cells.push(lat * LON_BANDS + lon);
            }
        }
        cells
    }

    /// Ranges for a set of cells, one per run of adjacent cell ids, each
    /// bounded by the optional day-digit window.
    fn cell_ranges(cells: &[u8], days: Option<(NaiveDate, NaiveDate)>) -> Vec<ByteRange> {
        match days {
            None => cell_runs(cells)
                .into_iter()
                .map(|(first, last)| {
                    ByteRange::new(
                        Bytes::from(cell_prefix(first)),
                        Bytes::from(cell_prefix(last + 1)),
                    )
                })
                .collect(),
            Some((first_day, last_day)) => cells
                .iter()
                .map(|&cell| day_window_range(cell, first_day, last_day))
                .collect(),
        }
    }
}

impl KeySchema for GridKeySchema {
    fn key_plan(&self, f: &KeyPlanningFilter) -> GtResult<KeyPlan> {
        let plan = match f {
            KeyPlanningFilter::AcceptEverything => KeyPlan::AcceptAll,
            KeyPlanningFilter::Date(t) => {
                let day = t.date_naive();
                let all: Vec<u8> = (0..CELL_COUNT).collect();
                KeyPlan::Ranges {
                    ranges: Self::cell_ranges(&all, Some((day, day))),
                    regex: None,
                }
            }
            KeyPlanningFilter::DateRange(t0, t1) => {
                let all: Vec<u8> = (0..CELL_COUNT).collect();
                KeyPlan::Ranges {
                    ranges: Self::cell_ranges(&all, Some((t0.date_naive(), t1.date_naive()))),
                    regex: None,
                }
            }
            KeyPlanningFilter::Spatial(b) => {
                let cells = Self::cells_for(b);
                let regex = cell_regex(&cells);
                KeyPlan::Ranges {
                    ranges: Self::cell_ranges(&cells, None),
                    regex,
                }
            }
            KeyPlanningFilter::SpatialDate(b, t) => {
                let cells = Self::cells_for(b);
                let regex = cell_regex(&cells);
                let day = t.date_naive();
                KeyPlan::Ranges {
                    ranges: Self::cell_ranges(&cells, Some((day, day))),
                    regex,
                }
            }
            KeyPlanningFilter::SpatialDateRange(b, t0, t1) => {
                let cells = Self::cells_for(b);
                let regex = cell_regex(&cells);
                KeyPlan::Ranges {
                    ranges: Self::cell_ranges(&cells, Some((t0.date_naive(), t1.date_naive()))),
                    regex,
                }
            }
        };
        if let KeyPlan::Ranges { ranges, regex } = &plan {
            debug!(
                ranges = ranges.len(),
                regex = regex.is_some(),
                "planned key ranges"
            );
        }
        Ok(plan)
    }

    fn column_families(&self, f: &KeyPlanningFilter) -> CfPlan {
        let interval = match f {
            KeyPlanningFilter::Date(t) | KeyPlanningFilter::SpatialDate(_, t) => Some((*t, *t)),
            KeyPlanningFilter::DateRange(t0, t1)
            | KeyPlanningFilter::SpatialDateRange(_, t0, t1) => Some((*t0, *t1)),
            KeyPlanningFilter::AcceptEverything | KeyPlanningFilter::Spatial(_) => None,
        };
        match interval {
            None => CfPlan::All,
            Some((t0, t1)) => {
                let buckets = month_buckets(t0, t1);
                if buckets.len() > MAX_CF_BUCKETS {
                    CfPlan::All
                } else {
                    CfPlan::List(buckets)
                }
            }
        }
    }

    fn describe(&self) -> String {
        "%02x#cell%yyyyMMdd#day%#id".to_string()
    }
}

fn cell_prefix(cell: u8) -> String {
    format!("{cell:02x}")
}

fn day_digits(day: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", day.year(), day.month(), day.day())
}

/// Runs of adjacent cell ids, as `(first, last)` pairs. Input must be sorted.
fn cell_runs(cells: &[u8]) -> Vec<(u8, u8)> {
    let mut runs: Vec<(u8, u8)> = Vec::new();
    for &cell in cells {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == cell => *last = cell,
            _ => runs.push((cell, cell)),
        }
    }
    runs
}

/// Row prefilter over the hex cell prefix: emitted only when the cell set is
/// non-adjacent, where coalesced server-side ranges could otherwise leak
/// rows from the gap cells.
fn cell_regex(cells: &[u8]) -> Option<String> {
    if cell_runs(cells).len() < 2 {
        return None;
    }
    let alternatives: Vec<String> = cells.iter().map(|&c| cell_prefix(c)).collect();
    Some(format!("^(?:{})", alternatives.join("|")))
}

/// The range of one cell restricted to `[first_day, last_day]`.
fn day_window_range(cell: u8, first_day: NaiveDate, last_day: NaiveDate) -> ByteRange {
    let start = format!("{}{}", cell_prefix(cell), day_digits(first_day));
    let end = match day_after(last_day) {
        Some(next) => format!("{}{}", cell_prefix(cell), day_digits(next)),
        // Day digits saturate at year 9999; spill to the next cell prefix.
        None => cell_prefix(cell + 1),
    };
    ByteRange::new(Bytes::from(start), Bytes::from(end))
}

/// The day after, while it still fits in four year digits.
fn day_after(day: NaiveDate) -> Option<NaiveDate> {
    day.succ_opt().filter(|next| next.year() <= 9999)
}

/// `yyyymm` buckets for every month touched by `[t0, t1]`.
fn month_buckets(t0: DateTime<Utc>, t1: DateTime<Utc>) -> Vec<Bytes> {
    let mut buckets = Vec::new();
    let (mut year, mut month) = (t0.year(), t0.month());
    let last = (t1.year(), t1.month());
    while (year, month) <= last {
        buckets.push(Bytes::from(format!("{year:04}{month:02}")));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    buckets
}
