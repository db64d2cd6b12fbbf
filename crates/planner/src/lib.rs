//! Strategy selection and plan compilation.
//!
//! The planner turns a logical filter over a typed feature schema into one
//! physical access plan against the sorted key-value store. It performs
//! three tasks:
//!
//! 1. **Extraction** - Folds the spatial/temporal conjuncts into a single
//!    polygon and interval, leaving a residual filter
//! 2. **Strategy Decision** - Applies a fixed rule table over attribute
//!    index availability and cardinality hints
//! 3. **Compilation** - Emits scan ranges, column families, and a
//!    prioritized server-side iterator stack
//!
//! # Architecture
//!
//! ```text
//! Parsed filter tree
//!     ↓
//! Normalize (flatten AND/OR, cancel NOT NOT)
//!     ↓
//! Extract space-time + residual
//!     ↓
//! Decide (index availability, cardinality hints)
//!     ↓
//! Compile one strategy → QueryPlan
//!     ↓
//! Executor
//! ```
//!
//! # Example
//!
//! ```no_run
//! use filter::Filter;
//! use planner::{QueryHints, QueryPlanner};
//! use schema::Schema;
//! use types::AttrValue;
//!
//! let schema = Schema::parse("obs", "attr2:String:index=true,geom:Point,dtg:Date").unwrap();
//! let planner = QueryPlanner::new(&schema);
//! let plan = planner
//!     .plan(Filter::eq("attr2", AttrValue::Text("val56".into())), &QueryHints::default())
//!     .unwrap();
//! ```

#[cfg(test)]
mod tests;

use bytes::Bytes;
use common::{prefix_successor, ByteRange, GtError, GtResult};
use filter::{classify, conjuncts as split_conjuncts, normalize, to_ecql, CompareOp, ConjunctKind, Filter};
use keyspace::{CfPlan, GridKeySchema, KeyPlan, KeySchema};
use schema::{Cardinality, Schema};
use spacetime::{everywhen, extract, key_planning_filter, Bounds, SpaceTimeQuery};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use types::{AttrType, AttrValue, Interval};

/// Current format version of the on-disk index layout. Versions at or below
/// zero predate the attribute index tables.
pub const INDEX_VERSION: i32 = 2;

/// Name of the feature value encoding, passed to the fine filter.
pub const FEATURE_ENCODING_NAME: &str = "packed-v1";

/// Reserved iterator priority bands. Stages install in ascending order.
pub const BAND_ROW_REGEX: u16 = 0;
pub const BAND_CF_REGEX: u16 = 100;
pub const BAND_COARSE_INDEX: u16 = 200;
pub const BAND_FINE_FILTER: u16 = 300;
pub const BAND_AGGREGATION: u16 = 400;

/// Option keys of the server-side iterator configuration contract. The
/// values are pre-encoded strings; the planner never re-encodes them.
pub mod opts {
    pub const REGEX: &str = "regex";
    pub const FEATURE_ENCODING: &str = "FEATURE_ENCODING";
    pub const ST_FILTER: &str = "ST_FILTER";
    pub const SFT: &str = "SFT";
    pub const SFT_NAME: &str = "SFT_NAME";
    pub const SFT_INDEX_VALUE: &str = "SFT_INDEX_VALUE";
    pub const ATTR_NAME: &str = "ATTR_NAME";
    pub const ECQL_FILTER: &str = "ECQL_FILTER";
    pub const TRANSFORMS: &str = "TRANSFORMS";
    pub const TRANSFORM_SCHEMA: &str = "TRANSFORM_SCHEMA";
    pub const DEFAULT_SCHEMA: &str = "DEFAULT_SCHEMA";
    pub const POLYGON: &str = "POLYGON";
    pub const WIDTH: &str = "WIDTH";
    pub const HEIGHT: &str = "HEIGHT";
    pub const INTERVAL: &str = "INTERVAL";
    pub const BUCKETS: &str = "BUCKETS";
}

/// Class names of the server-side iterators the compilers configure.
pub mod iters {
    pub const ROW_REGEX: &str = "geotable.iter.RowRegexFilter";
    pub const ST_INTERSECT: &str = "geotable.iter.SpatioTemporalIntersect";
    pub const ATTR_INDEX: &str = "geotable.iter.AttributeIndexFilter";
    pub const FINE_FILTER: &str = "geotable.iter.SimpleFeatureFilter";
    pub const DENSITY: &str = "geotable.iter.DensityAggregate";
    pub const TEMPORAL_DENSITY: &str = "geotable.iter.TemporalDensityAggregate";
}

/// One configured server-side iterator. Smaller priorities run first.
#[derive(Clone, Debug, PartialEq)]
pub struct IteratorStage {
    pub priority: u16,
    pub name: String,
    pub class_name: String,
    pub options: BTreeMap<String, String>,
}

/// The physical access strategy chosen for a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StrategyTag {
    StIdx,
    AttrEq,
    AttrRange,
    AttrLike,
    RecordId,
}

/// A compiled physical plan: scan ranges, column families, and the iterator
/// stack. Consumed exactly once by the executor adapter.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub ranges: Vec<ByteRange>,
    /// Column families to fetch; empty means no restriction.
    pub column_families: Vec<Bytes>,
    pub iterators: Vec<IteratorStage>,
    pub strategy: StrategyTag,
}

impl QueryPlan {
    /// The plan that yields nothing: no ranges, no iterators.
    pub fn empty(strategy: StrategyTag) -> Self {
        Self {
            ranges: Vec::new(),
            column_families: Vec::new(),
            iterators: Vec::new(),
            strategy,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Projection and aggregation hints attached to a query.
#[derive(Clone, Debug, Default, bon::Builder)]
pub struct QueryHints {
    /// Transform expressions, one `property=expression` per entry.
    pub transforms: Option<Vec<String>>,
    pub transform_schema: Option<Schema>,
    pub density: Option<DensityHints>,
    pub temporal_density: Option<TemporalDensityHints>,
}

/// Gridded spatial density aggregation. Width and height are required at
/// compile time; bounds default to the query polygon.
#[derive(Clone, Debug, Default, bon::Builder)]
pub struct DensityHints {
    pub bounds: Option<Bounds>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Bucketed temporal density aggregation. Buckets are required at compile
/// time; the interval defaults to the query interval.
#[derive(Clone, Debug, Default, bon::Builder)]
pub struct TemporalDensityHints {
    pub interval: Option<Interval>,
    pub buckets: Option<u32>,
}

/// Cardinality hint for an attribute; `Unknown` when the schema carries
/// none.
pub fn cardinality(schema: &Schema, attr: &str) -> Cardinality {
    schema
        .attribute(attr)
        .map(|a| a.cardinality)
        .unwrap_or_default()
}

/// Apply the strategy decision table. Pure: reordering the conjuncts of a
/// top-level `AND` never changes the outcome.
pub fn choose_strategy(
    schema: &Schema,
    f: &Filter,
    _hints: &QueryHints,
    version: i32,
) -> StrategyTag {
    let conjuncts = split_conjuncts(normalize(f.clone()));
    let st = extract(conjuncts.clone(), schema);
    decide(schema, &conjuncts, &st, version)
}

/// Main planner entry point: decides a strategy and compiles it.
pub struct QueryPlanner<'a> {
    schema: &'a Schema,
    key_schema: &'a dyn KeySchema,
    version: i32,
}

static GRID: GridKeySchema = GridKeySchema;

impl<'a> QueryPlanner<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            key_schema: &GRID,
            version: INDEX_VERSION,
        }
    }

    /// Plan against an older index format version.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Plan against a different on-disk key layout.
    pub fn with_key_schema(mut self, key_schema: &'a dyn KeySchema) -> Self {
        self.key_schema = key_schema;
        self
    }

    /// Compile a filter into a physical plan.
    ///
    /// # Errors
    ///
    /// Returns `GtError::Config` when an aggregation hint is missing a
    /// required parameter, and `GtError::Plan` if a compiler invariant is
    /// violated. An unsatisfiable filter is not an error: it compiles to a
    /// plan with no ranges.
    pub fn plan(&self, f: Filter, hints: &QueryHints) -> GtResult<QueryPlan> {
        let conjuncts = split_conjuncts(normalize(f));
        if conjuncts.iter().any(|c| matches!(c, Filter::ExcludeAll)) {
            return Ok(QueryPlan::empty(StrategyTag::StIdx));
        }
        let st = extract(conjuncts.clone(), self.schema);
        if st.is_exclude() {
            return Ok(QueryPlan::empty(StrategyTag::StIdx));
        }
        let strategy = decide(self.schema, &conjuncts, &st, self.version);
        debug!(?strategy, "chose strategy");
        match strategy {
            StrategyTag::StIdx => self.compile_st(&st, hints),
            StrategyTag::AttrEq => self.compile_attr_eq(&conjuncts, hints),
            StrategyTag::AttrRange => self.compile_attr_range(&conjuncts, hints),
            StrategyTag::AttrLike => self.compile_attr_like(&conjuncts, hints),
            StrategyTag::RecordId => self.compile_record_id(&conjuncts, hints),
        }
    }

    /// Spatio-temporal index scan: ranges and column families from the key
    /// schema, a coarse intersect stage, and the fine filter.
    fn compile_st(&self, st: &SpaceTimeQuery, hints: &QueryHints) -> GtResult<QueryPlan> {
        let kpf = key_planning_filter(st.polygon.as_ref(), st.interval.as_ref());
        let key_plan = self.key_schema.key_plan(&kpf)?;
        let cf_plan = self.key_schema.column_families(&kpf);
        let regex = key_plan.to_regex().map(str::to_string);
        let ranges = key_plan.into_ranges();

        let mut stages = Stages::new();
        if let Some(r) = regex {
            let mut options = BTreeMap::new();
            options.insert(opts::REGEX.to_string(), r);
            stages.push(BAND_ROW_REGEX, "rowRegex", iters::ROW_REGEX, options);
        }

        let mut coarse = BTreeMap::new();
        coarse.insert(opts::DEFAULT_SCHEMA.to_string(), self.key_schema.describe());
        coarse.insert(opts::SFT.to_string(), self.schema.encoded());
        if let Some(p) = &st.polygon {
            coarse.insert(opts::ST_FILTER.to_string(), filter::polygon_wkt(p));
        }
        if let Some(i) = &st.interval {
            coarse.insert(
                opts::INTERVAL.to_string(),
                format!("{}/{}", i.start_millis(), i.end_millis()),
            );
        }
        stages.push(BAND_COARSE_INDEX, "stIntersect", iters::ST_INTERSECT, coarse);

        let aggregating = hints.density.is_some() || hints.temporal_density.is_some();
        let fine = self.fine_filter_options(&st.residual, hints, !aggregating);
        stages.push(BAND_FINE_FILTER, "fineFilter", iters::FINE_FILTER, fine);

        if let Some(d) = &hints.density {
            let (width, height) = match (d.width, d.height) {
                (Some(w), Some(h)) => (w, h),
                _ => {
                    return Err(GtError::Config(
                        "density plan requires width and height".into(),
                    ));
                }
            };
            let bounds = d
                .bounds
                .or_else(|| st.polygon.as_ref().and_then(Bounds::from_polygon))
                .unwrap_or_else(Bounds::everywhere);
            let mut options = BTreeMap::new();
            options.insert(opts::POLYGON.to_string(), bounds.wkt());
            options.insert(opts::WIDTH.to_string(), width.to_string());
            options.insert(opts::HEIGHT.to_string(), height.to_string());
            stages.push(BAND_AGGREGATION, "density", iters::DENSITY, options);
        }
        if let Some(td) = &hints.temporal_density {
            let buckets = td.buckets.ok_or_else(|| {
                GtError::Config("temporal density plan requires buckets".into())
            })?;
            let interval = td.interval.or(st.interval).unwrap_or_else(everywhen);
            let mut options = BTreeMap::new();
            options.insert(
                opts::INTERVAL.to_string(),
                format!("{}/{}", interval.start_millis(), interval.end_millis()),
            );
            options.insert(opts::BUCKETS.to_string(), buckets.to_string());
            stages.push(
                BAND_AGGREGATION,
                "temporalDensity",
                iters::TEMPORAL_DENSITY,
                options,
            );
        }

        Ok(QueryPlan {
            ranges,
            column_families: cf_list(cf_plan),
            iterators: stages.into_vec(),
            strategy: StrategyTag::StIdx,
        })
    }

    /// Attribute equality: phase-1 prefix range on the attribute index
    /// table; the executor collects record ids from the column families and
    /// resolves them against the record table.
    fn compile_attr_eq(&self, conjuncts: &[Filter], hints: &QueryHints) -> GtResult<QueryPlan> {
        let preds = attribute_predicates(self.schema, conjuncts);
        let pivot = preds
            .iter()
            .find(|p| p.indexed && p.shape == Shape::Eq && p.cardinality == Cardinality::High)
            .or_else(|| preds.iter().find(|p| p.indexed && p.shape == Shape::Eq))
            .ok_or_else(|| GtError::Plan("attribute equality strategy without an indexed equality conjunct".into()))?;
        let Filter::Eq { property, value } = &conjuncts[pivot.idx] else {
            return Err(GtError::Plan("equality pivot is not an equality".into()));
        };

        let mut row = attr_row_prefix(property);
        row.extend_from_slice(&value.to_sortable_bytes());
        let end = prefix_successor(&row).unwrap_or_else(|| attr_space_end(property));
        let ranges = vec![ByteRange::new(Bytes::from(row), end)];

        let residual = residual_excluding(conjuncts, &[pivot.idx]);
        let iterators = self.attr_stages(property, &residual, hints);
        Ok(QueryPlan {
            ranges,
            column_families: Vec::new(),
            iterators,
            strategy: StrategyTag::AttrEq,
        })
    }

    /// Attribute range: one byte range over the attribute index with
    /// inclusivity following the operators. All range conjuncts on the
    /// pivot attribute intersect into a single window.
    fn compile_attr_range(&self, conjuncts: &[Filter], hints: &QueryHints) -> GtResult<QueryPlan> {
        let preds = attribute_predicates(self.schema, conjuncts);
        let pivot_name = preds
            .iter()
            .find(|p| p.indexed && p.shape == Shape::Range)
            .map(|p| p.name.clone())
            .ok_or_else(|| GtError::Plan("attribute range strategy without an indexed range conjunct".into()))?;
        let ty = self
            .schema
            .attribute(&pivot_name)
            .map(|a| a.ty)
            .ok_or_else(|| GtError::Plan(format!("unknown pivot attribute '{pivot_name}'")))?;

        let prefix = attr_row_prefix(&pivot_name);
        let mut start: Vec<u8> = [prefix.clone(), ty.min_key()].concat();
        let mut end: Vec<u8> = match ty.max_key() {
            Some(mk) => {
                let mut e = [prefix.clone(), mk].concat();
                e.push(0x00);
                e
            }
            None => attr_space_end(&pivot_name).to_vec(),
        };
        let mut consumed = Vec::new();
        for pred in preds.iter().filter(|p| p.shape == Shape::Range && p.name == pivot_name) {
            let (lo, hi) = range_bounds(&conjuncts[pred.idx])?;
            if let Some((bytes, inclusive)) = lo {
                let mut bound = [prefix.clone(), bytes].concat();
                if !inclusive {
                    bound.push(0x00);
                }
                start = start.max(bound);
            }
            if let Some((bytes, inclusive)) = hi {
                let mut bound = [prefix.clone(), bytes].concat();
                if inclusive {
                    bound.push(0x00);
                }
                end = end.min(bound);
            }
            consumed.push(pred.idx);
        }
        if start >= end {
            // The range conjuncts cannot all hold at once.
            return Ok(QueryPlan::empty(StrategyTag::AttrRange));
        }

        let residual = residual_excluding(conjuncts, &consumed);
        let iterators = self.attr_stages(&pivot_name, &residual, hints);
        Ok(QueryPlan {
            ranges: vec![ByteRange::new(Bytes::from(start), Bytes::from(end))],
            column_families: Vec::new(),
            iterators,
            strategy: StrategyTag::AttrRange,
        })
    }

    /// Attribute prefix match: the literal prefix is the range floor and its
    /// byte successor the ceiling.
    fn compile_attr_like(&self, conjuncts: &[Filter], hints: &QueryHints) -> GtResult<QueryPlan> {
        let preds = attribute_predicates(self.schema, conjuncts);
        let pivot = preds
            .iter()
            .find_map(|p| match (&p.shape, p.indexed) {
                (Shape::LikePrefix(prefix), true) => Some((p.idx, p.name.clone(), prefix.clone())),
                _ => None,
            })
            .ok_or_else(|| GtError::Plan("attribute like strategy without an indexed prefix pattern".into()))?;
        let (idx, name, literal) = pivot;

        let mut floor = attr_row_prefix(&name);
        floor.extend_from_slice(literal.as_bytes());
        let ceiling = match prefix_successor(literal.as_bytes()) {
            Some(succ) => {
                let mut end = attr_row_prefix(&name);
                end.extend_from_slice(&succ);
                Bytes::from(end)
            }
            None => attr_space_end(&name),
        };

        let residual = residual_excluding(conjuncts, &[idx]);
        let iterators = self.attr_stages(&name, &residual, hints);
        Ok(QueryPlan {
            ranges: vec![ByteRange::new(Bytes::from(floor), ceiling)],
            column_families: Vec::new(),
            iterators,
            strategy: StrategyTag::AttrLike,
        })
    }

    /// Record id lookup: the union of every id set, one single-row range
    /// per id against the record table.
    fn compile_record_id(&self, conjuncts: &[Filter], hints: &QueryHints) -> GtResult<QueryPlan> {
        let mut ids: BTreeSet<String> = BTreeSet::new();
        let mut consumed = Vec::new();
        for (idx, conjunct) in conjuncts.iter().enumerate() {
            if let Filter::IdIn(set) = conjunct {
                ids.extend(set.iter().cloned());
                consumed.push(idx);
            }
        }
        if ids.is_empty() {
            return Err(GtError::Plan("record id strategy without an id conjunct".into()));
        }

        let keys: Vec<Bytes> = ids.into_iter().map(Bytes::from).collect();
        let ranges = KeyPlan::List(keys).into_ranges();

        let residual = residual_excluding(conjuncts, &consumed);
        let mut stages = Stages::new();
        let fine = self.fine_filter_options(&residual, hints, true);
        stages.push(BAND_FINE_FILTER, "fineFilter", iters::FINE_FILTER, fine);
        Ok(QueryPlan {
            ranges,
            column_families: Vec::new(),
            iterators: stages.into_vec(),
            strategy: StrategyTag::RecordId,
        })
    }

    /// The two stages shared by the attribute strategies: the band-200
    /// index decode and the band-300 fine filter.
    fn attr_stages(&self, attr_name: &str, residual: &Filter, hints: &QueryHints) -> Vec<IteratorStage> {
        let mut stages = Stages::new();
        let mut index_opts = BTreeMap::new();
        index_opts.insert(opts::ATTR_NAME.to_string(), attr_name.to_string());
        index_opts.insert(opts::SFT_NAME.to_string(), self.schema.type_name().to_string());
        index_opts.insert(opts::SFT_INDEX_VALUE.to_string(), "true".to_string());
        stages.push(BAND_COARSE_INDEX, "attrIndex", iters::ATTR_INDEX, index_opts);

        let fine = self.fine_filter_options(residual, hints, true);
        stages.push(BAND_FINE_FILTER, "fineFilter", iters::FINE_FILTER, fine);
        stages.into_vec()
    }

    fn fine_filter_options(
        &self,
        residual: &Filter,
        hints: &QueryHints,
        allow_transforms: bool,
    ) -> BTreeMap<String, String> {
        let mut options = BTreeMap::new();
        options.insert(opts::SFT.to_string(), self.schema.encoded());
        options.insert(opts::SFT_NAME.to_string(), self.schema.type_name().to_string());
        options.insert(
            opts::FEATURE_ENCODING.to_string(),
            FEATURE_ENCODING_NAME.to_string(),
        );
        if *residual != Filter::IncludeAll {
            options.insert(opts::ECQL_FILTER.to_string(), to_ecql(residual));
        }
        if allow_transforms {
            if let Some(transforms) = &hints.transforms {
                options.insert(opts::TRANSFORMS.to_string(), transforms.join(";"));
            }
            if let Some(transform_schema) = &hints.transform_schema {
                options.insert(opts::TRANSFORM_SCHEMA.to_string(), transform_schema.encoded());
            }
        }
        options
    }
}

/// The decision table. First match wins; evaluated in rule order.
fn decide(schema: &Schema, conjuncts: &[Filter], st: &SpaceTimeQuery, version: i32) -> StrategyTag {
    // Rule 1: attribute indexes did not exist before version 1.
    if version <= 0 {
        return StrategyTag::StIdx;
    }

    // Rule 2: id predicates dominate everything else.
    if conjuncts.iter().any(|c| matches!(c, Filter::IdIn(_))) {
        return StrategyTag::RecordId;
    }

    let preds = attribute_predicates(schema, conjuncts);

    // Rule 3: equality on a high-cardinality indexed attribute yields few
    // rows. Predicates are canonicalized by attribute name, so ties resolve
    // the same way under any conjunct order.
    if preds
        .iter()
        .any(|p| p.indexed && p.shape == Shape::Eq && p.cardinality == Cardinality::High)
    {
        return StrategyTag::AttrEq;
    }

    // Rule 4: with no space-time constraint, any indexed attribute
    // predicate beats a full table scan.
    if st.polygon.is_none() && st.interval.is_none() {
        if preds.iter().any(|p| p.indexed && p.shape == Shape::Eq) {
            return StrategyTag::AttrEq;
        }
        if preds
            .iter()
            .any(|p| p.indexed && matches!(p.shape, Shape::LikePrefix(_)))
        {
            return StrategyTag::AttrLike;
        }
        if preds.iter().any(|p| p.indexed && p.shape == Shape::Range) {
            return StrategyTag::AttrRange;
        }
    }

    // Rule 5: a low-cardinality attribute fans out too widely; the
    // space-time index is more selective when a spatial predicate exists.
    let indexed: Vec<_> = preds.iter().filter(|p| p.indexed).collect();
    if st.polygon.is_some()
        && !indexed.is_empty()
        && indexed.iter().all(|p| p.cardinality == Cardinality::Low)
    {
        debug!("low-cardinality attributes defer to the space-time index");
        return StrategyTag::StIdx;
    }

    // Rule 6: default.
    StrategyTag::StIdx
}

#[derive(Clone, Debug, PartialEq)]
enum Shape {
    Eq,
    Range,
    LikePrefix(String),
    Opaque,
}

struct AttrPredicate {
    idx: usize,
    name: String,
    indexed: bool,
    cardinality: Cardinality,
    shape: Shape,
}

/// Attribute-shaped conjuncts, canonicalized by attribute name so that
/// strategy choice is stable under conjunct reordering.
fn attribute_predicates(schema: &Schema, conjuncts: &[Filter]) -> Vec<AttrPredicate> {
    let mut preds: Vec<AttrPredicate> = Vec::new();
    for (idx, conjunct) in conjuncts.iter().enumerate() {
        let ConjunctKind::Attribute(name) = classify(conjunct, schema) else {
            continue;
        };
        let attr = schema.attribute(&name);
        let shape = match conjunct {
            Filter::Eq { .. } => Shape::Eq,
            Filter::Compare { .. } | Filter::Between { .. } | Filter::Temporal { .. } => {
                Shape::Range
            }
            Filter::Like { pattern, .. } => {
                match (attr.map(|a| a.ty), like_prefix(pattern)) {
                    (Some(AttrType::String), Some(prefix)) => Shape::LikePrefix(prefix),
                    _ => Shape::Opaque,
                }
            }
            _ => Shape::Opaque,
        };
        preds.push(AttrPredicate {
            idx,
            name: name.clone(),
            indexed: attr.is_some_and(|a| a.indexed),
            cardinality: attr.map(|a| a.cardinality).unwrap_or_default(),
            shape,
        });
    }
    preds.sort_by(|a, b| a.name.cmp(&b.name));
    preds
}

/// The literal prefix of a pattern that is a prefix match: a non-empty
/// literal followed by one or more `%`, with no `_` and no embedded `%`.
fn like_prefix(pattern: &str) -> Option<String> {
    let literal = pattern.trim_end_matches('%');
    if literal.is_empty() || literal.len() == pattern.len() {
        return None;
    }
    if literal.contains('%') || literal.contains('_') {
        return None;
    }
    Some(literal.to_string())
}

/// Lower and upper bounds contributed by one range-shaped conjunct, as
/// (sortable bytes, inclusive) pairs.
fn range_bounds(conjunct: &Filter) -> GtResult<(Option<(Vec<u8>, bool)>, Option<(Vec<u8>, bool)>)> {
    use filter::TemporalOp;
    match conjunct {
        Filter::Compare { op, value, .. } => {
            let bytes = value.to_sortable_bytes();
            Ok(match op {
                CompareOp::Lt => (None, Some((bytes, false))),
                CompareOp::LtEq => (None, Some((bytes, true))),
                CompareOp::Gt => (Some((bytes, false)), None),
                CompareOp::GtEq => (Some((bytes, true)), None),
            })
        }
        Filter::Between { lo, hi, .. } => Ok((
            Some((lo.to_sortable_bytes(), true)),
            Some((hi.to_sortable_bytes(), true)),
        )),
        Filter::Temporal { op, time, .. } => {
            let interval = time.as_interval();
            let start = AttrValue::Date(interval.start()).to_sortable_bytes();
            let end = AttrValue::Date(interval.end()).to_sortable_bytes();
            Ok(match op {
                TemporalOp::During => (Some((start, true)), Some((end, true))),
                TemporalOp::Equals => (Some((start.clone(), true)), Some((start, true))),
                TemporalOp::Before => (None, Some((start, false))),
                TemporalOp::After => (Some((start, false)), None),
            })
        }
        other => Err(GtError::Plan(format!(
            "not a range conjunct: {other:?}"
        ))),
    }
}

/// `name || 0x00`, the row prefix of one attribute's index entries.
fn attr_row_prefix(name: &str) -> Vec<u8> {
    let mut prefix = name.as_bytes().to_vec();
    prefix.push(0x00);
    prefix
}

/// The first row key past every index entry of an attribute.
fn attr_space_end(name: &str) -> Bytes {
    let mut end = name.as_bytes().to_vec();
    end.push(0x01);
    Bytes::from(end)
}

/// Everything except the consumed conjuncts, re-joined under `AND`.
fn residual_excluding(conjuncts: &[Filter], consumed: &[usize]) -> Filter {
    let mut rest: Vec<Filter> = conjuncts
        .iter()
        .enumerate()
        .filter(|(idx, _)| !consumed.contains(idx))
        .map(|(_, c)| c.clone())
        .collect();
    match rest.len() {
        0 => Filter::IncludeAll,
        1 => rest.remove(0),
        _ => Filter::And(rest),
    }
}

fn cf_list(plan: CfPlan) -> Vec<Bytes> {
    match plan {
        CfPlan::List(cfs) => cfs,
        CfPlan::All => Vec::new(),
    }
}

/// Stage factory with a per-plan counter: names are unique within one plan
/// and deterministic across runs.
struct Stages {
    next: u32,
    stages: Vec<IteratorStage>,
}

impl Stages {
    fn new() -> Self {
        Self {
            next: 0,
            stages: Vec::new(),
        }
    }

    fn push(
        &mut self,
        priority: u16,
        label: &str,
        class_name: &str,
        options: BTreeMap<String, String>,
    ) {
        self.next += 1;
        self.stages.push(IteratorStage {
            priority,
            name: format!("{label}-{}", self.next),
            class_name: class_name.to_string(),
            options,
        });
    }

    fn into_vec(self) -> Vec<IteratorStage> {
        self.stages
    }
}

/// Pretty-print a plan for debugging.
pub fn explain_plan(p: &QueryPlan) -> String {
    let mut out = format!(
        "{:?} ranges={} cfs={}",
        p.strategy,
        p.ranges.len(),
        p.column_families.len()
    );
    for stage in &p.iterators {
        out.push_str(&format!(
            "\n  [{}] {} {}",
            stage.priority, stage.name, stage.class_name
        ));
    }
    out
}
