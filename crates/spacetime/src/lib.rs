//! Space-time extraction and netting.
//!
//! Given the conjuncts of a query, the extractor folds every spatial
//! predicate on the default geometry into one bounding polygon and every
//! temporal predicate on the default date into one interval, keeping
//! whatever it could not fully absorb as the residual filter. Outputs are
//! *netted*: clamped to the index's representable domain (`Everywhere` in
//! space, `Everywhen` in time).


use chrono::{DateTime, TimeZone, Utc};
use filter::{classify, ConjunctKind, Filter, SpatialOp, TemporalOp};
use geo::BoundingRect;
use geo_types::{Coord, Polygon, Rect};
use schema::Schema;
use tracing::trace;
use types::Interval;

/// Axis-aligned rectangular bounds in lon/lat degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds(Rect<f64>);

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self(Rect::new(
            Coord { x: min_x, y: min_y },
            Coord { x: max_x, y: max_y },
        ))
    }

    /// The whole representable domain.
    pub fn everywhere() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    pub fn from_polygon(p: &Polygon<f64>) -> Option<Self> {
        p.bounding_rect().map(Self)
    }

    pub fn min_x(&self) -> f64 {
        self.0.min().x
    }

    pub fn min_y(&self) -> f64 {
        self.0.min().y
    }

    pub fn max_x(&self) -> f64 {
        self.0.max().x
    }

    pub fn max_y(&self) -> f64 {
        self.0.max().y
    }

    pub fn covers(&self, other: &Bounds) -> bool {
        self.min_x() <= other.min_x()
            && self.min_y() <= other.min_y()
            && self.max_x() >= other.max_x()
            && self.max_y() >= other.max_y()
    }

    /// Intersection of two closed rectangles; `None` when disjoint.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let min_x = self.min_x().max(other.min_x());
        let min_y = self.min_y().max(other.min_y());
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());
        (min_x <= max_x && min_y <= max_y).then(|| Bounds::new(min_x, min_y, max_x, max_y))
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.0.to_polygon()
    }

    pub fn wkt(&self) -> String {
        filter::polygon_wkt(&self.to_polygon())
    }
}

/// Clamp a polygon to the spatial domain. The polygon passes through
/// untouched when the domain covers it; a polygon covering the whole domain
/// collapses to the domain rectangle; anything else intersects with the
/// domain. `None` when the polygon lies outside the domain entirely or has
/// no bounds.
pub fn net_polygon(p: Polygon<f64>) -> Option<Polygon<f64>> {
    let bounds = Bounds::from_polygon(&p)?;
    let world = Bounds::everywhere();
    if bounds.covers(&world) {
        Some(world.to_polygon())
    } else if world.covers(&bounds) {
        Some(p)
    } else {
        bounds.intersection(&world).map(|b| b.to_polygon())
    }
}

/// Clamp an interval to the temporal domain.
pub fn net_interval(i: Interval) -> Option<Interval> {
    everywhen().overlap(&i)
}

/// The whole representable temporal domain.
pub fn everywhen() -> Interval {
    let start = Utc
        .with_ymd_and_hms(1970, 1, 1, 0, 0, 0)
        .single()
        .expect("valid domain bound");
    let end = Utc
        .with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .expect("valid domain bound");
    Interval::new(start, end)
}

/// Result of extracting space and time from the conjuncts of a query.
#[derive(Clone, Debug, PartialEq)]
pub struct SpaceTimeQuery {
    pub polygon: Option<Polygon<f64>>,
    pub interval: Option<Interval>,
    /// Conjuncts the extractor did not consume, re-joined under `AND`.
    pub residual: Filter,
}

impl SpaceTimeQuery {
    /// The empty query: some predicate can never match.
    pub fn exclude_all() -> Self {
        Self {
            polygon: None,
            interval: None,
            residual: Filter::ExcludeAll,
        }
    }

    pub fn is_exclude(&self) -> bool {
        self.residual == Filter::ExcludeAll
    }
}

/// Fold the spatial and temporal conjuncts into a single polygon and
/// interval.
///
/// Only `INTERSECTS` and `BBOX` conjuncts fold into the polygon: the coarse
/// index stage has intersects semantics, so `WITHIN` and `CONTAINS` go to
/// the residual for the fine filter to enforce. A single folded conjunct is
/// consumed verbatim. Two or more intersect as bounding rectangles and all
/// stay in the residual: the rectangle is a sound over-approximation and
/// the fine filter re-checks exactness. An empty spatial or temporal
/// intersection short-circuits to `ExcludeAll`.
pub fn extract(conjuncts: Vec<Filter>, schema: &Schema) -> SpaceTimeQuery {
    let mut spatial: Vec<Filter> = Vec::new();
    let mut interval: Option<Interval> = None;
    let mut residual: Vec<Filter> = Vec::new();

    for conjunct in conjuncts {
        match classify(&conjunct, schema) {
            ConjunctKind::Spatial => match &conjunct {
                Filter::Spatial {
                    op: SpatialOp::Intersects | SpatialOp::BBox,
                    ..
                } => spatial.push(conjunct),
                _ => residual.push(conjunct),
            },
            ConjunctKind::Temporal => {
                let this = temporal_interval(&conjunct);
                let merged = match interval {
                    None => Some(this),
                    Some(prev) => match prev.overlap(&this) {
                        Some(i) => Some(i),
                        None => return SpaceTimeQuery::exclude_all(),
                    },
                };
                interval = merged;
            }
            _ => residual.push(conjunct),
        }
    }

    let polygon = match spatial_polygon(&spatial) {
        SpatialFold::None => {
            residual.extend(spatial);
            None
        }
        SpatialFold::Consumed(p) => match net_polygon(p) {
            Some(p) => Some(p),
            None => return SpaceTimeQuery::exclude_all(),
        },
        SpatialFold::Approximated(p) => {
            residual.extend(spatial);
            match net_polygon(p) {
                Some(p) => Some(p),
                None => return SpaceTimeQuery::exclude_all(),
            }
        }
        SpatialFold::Empty => return SpaceTimeQuery::exclude_all(),
    };

    let interval = match interval {
        Some(i) => match net_interval(i) {
            Some(i) => Some(i),
            None => return SpaceTimeQuery::exclude_all(),
        },
        None => None,
    };

    trace!(
        spatial = polygon.is_some(),
        temporal = interval.is_some(),
        residuals = residual.len(),
        "extracted space-time query"
    );

    let residual = match residual.len() {
        0 => Filter::IncludeAll,
        1 => residual.remove(0),
        _ => Filter::And(residual),
    };

    SpaceTimeQuery {
        polygon,
        interval,
        residual,
    }
}

enum SpatialFold {
    /// No usable spatial predicate.
    None,
    /// Exactly one polygon, consumed verbatim.
    Consumed(Polygon<f64>),
    /// Bounding-rectangle intersection of several polygons.
    Approximated(Polygon<f64>),
    /// The predicates cannot all hold at once.
    Empty,
}

fn spatial_polygon(spatial: &[Filter]) -> SpatialFold {
    let mut polys: Vec<&Polygon<f64>> = Vec::with_capacity(spatial.len());
    for conjunct in spatial {
        let Filter::Spatial { geometry, .. } = conjunct else {
            return SpatialFold::None;
        };
        if Bounds::from_polygon(geometry).is_none() {
            // Unbounded or degenerate geometry: give up on spatial planning
            // and let the fine filter handle every spatial conjunct.
            return SpatialFold::None;
        }
        polys.push(geometry);
    }
    match polys.len() {
        0 => SpatialFold::None,
        1 => SpatialFold::Consumed(polys[0].clone()),
        _ => {
            let mut acc = match Bounds::from_polygon(polys[0]) {
                Some(b) => b,
                None => return SpatialFold::None,
            };
            for p in &polys[1..] {
                let b = match Bounds::from_polygon(p) {
                    Some(b) => b,
                    None => return SpatialFold::None,
                };
                acc = match acc.intersection(&b) {
                    Some(next) => next,
                    None => return SpatialFold::Empty,
                };
            }
            SpatialFold::Approximated(acc.to_polygon())
        }
    }
}

fn temporal_interval(conjunct: &Filter) -> Interval {
    let Filter::Temporal { op, time, .. } = conjunct else {
        // classify() only routes Temporal variants here.
        return everywhen();
    };
    let operand = time.as_interval();
    match op {
        TemporalOp::During => operand,
        TemporalOp::Equals => Interval::instant(operand.start()),
        TemporalOp::Before => Interval::new(everywhen().start(), operand.start()),
        TemporalOp::After => Interval::new(operand.start(), everywhen().end()),
    }
}

/// The shape of a space-time predicate, as consumed by the key planner.
/// Instant versus range is decided by `start == end`.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyPlanningFilter {
    AcceptEverything,
    Date(DateTime<Utc>),
    DateRange(DateTime<Utc>, DateTime<Utc>),
    Spatial(Bounds),
    SpatialDate(Bounds, DateTime<Utc>),
    SpatialDateRange(Bounds, DateTime<Utc>, DateTime<Utc>),
}

/// Build the key-planning filter for an extracted polygon and interval.
pub fn key_planning_filter(
    polygon: Option<&Polygon<f64>>,
    interval: Option<&Interval>,
) -> KeyPlanningFilter {
    let bounds = polygon.and_then(Bounds::from_polygon);
    match (bounds, interval) {
        (None, None) => KeyPlanningFilter::AcceptEverything,
        (None, Some(i)) if i.is_instant() => KeyPlanningFilter::Date(i.start()),
        (None, Some(i)) => KeyPlanningFilter::DateRange(i.start(), i.end()),
        (Some(b), None) => KeyPlanningFilter::Spatial(b),
        (Some(b), Some(i)) if i.is_instant() => KeyPlanningFilter::SpatialDate(b, i.start()),
        (Some(b), Some(i)) => KeyPlanningFilter::SpatialDateRange(b, i.start(), i.end()),
    }
}
