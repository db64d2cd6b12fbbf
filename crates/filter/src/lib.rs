//! Logical filter trees and their normalization.
//!
//! The query parser hands the planner a [`Filter`]: a tagged tree over owned
//! children. This crate canonicalizes it (flattening nested `AND`/`OR`,
//! cancelling double negation), splits a top-level `AND` into conjuncts,
//! classifies each conjunct against a schema, and renders residual conjuncts
//! back to ECQL text for server-side fine filtering.


use chrono::{DateTime, SecondsFormat, Utc};
use common::{GtError, GtResult};
use geo_types::{Coord, LineString, Polygon, Rect};
use schema::Schema;
use std::collections::BTreeSet;
use types::{AttrValue, Interval};

/// Comparison operators over a property and a literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// The operator as seen from the other side: `11 > attr` is `attr < 11`.
    pub fn reflect(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }

    pub fn as_ecql(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// Spatial predicate operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpatialOp {
    Intersects,
    Within,
    Contains,
    BBox,
}

/// Temporal predicate operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemporalOp {
    Before,
    After,
    During,
    Equals,
}

/// Operand of a temporal predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeOperand {
    Instant(DateTime<Utc>),
    Range(Interval),
}

impl TimeOperand {
    pub fn as_interval(&self) -> Interval {
        match self {
            Self::Instant(t) => Interval::instant(*t),
            Self::Range(i) => *i,
        }
    }
}

/// A parsed logical filter tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Eq {
        property: String,
        value: AttrValue,
    },
    Compare {
        op: CompareOp,
        property: String,
        value: AttrValue,
    },
    Between {
        property: String,
        lo: AttrValue,
        hi: AttrValue,
    },
    Like {
        property: String,
        pattern: String,
        case_insensitive: bool,
    },
    IdIn(BTreeSet<String>),
    Spatial {
        op: SpatialOp,
        property: String,
        geometry: Polygon<f64>,
    },
    Temporal {
        op: TemporalOp,
        property: String,
        time: TimeOperand,
    },
    IncludeAll,
    ExcludeAll,
}

impl Filter {
    pub fn eq(property: impl Into<String>, value: AttrValue) -> Self {
        Self::Eq {
            property: property.into(),
            value,
        }
    }

    /// A `BBOX` predicate over the rectangle `(min_x, min_y)..(max_x, max_y)`.
    pub fn bbox(property: impl Into<String>, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::Spatial {
            op: SpatialOp::BBox,
            property: property.into(),
            geometry: rect_polygon(min_x, min_y, max_x, max_y),
        }
    }

    pub fn id_in<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Self {
        Self::IdIn(ids.into_iter().map(Into::into).collect())
    }

    /// Build a comparison from the two operand expressions of the parser.
    ///
    /// Returns `Ok(None)` for literal/literal and property/property shapes;
    /// the caller keeps those as opaque residual. The operator is reflected
    /// when the property appeared on the right.
    pub fn compare(op: CompareOp, lhs: &Expr, rhs: &Expr) -> GtResult<Option<Filter>> {
        Ok(PropertyLiteral::pair(lhs, rhs)?.map(|pl| {
            let op = if pl.flipped { op.reflect() } else { op };
            Filter::Compare {
                op,
                property: pl.name,
                value: pl.value,
            }
        }))
    }
}

/// One operand of a comparison expression as handed over by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Property(String),
    Literal(AttrValue),
    /// A function call or arithmetic the planner cannot classify.
    Call { name: String, args: Vec<Expr> },
}

/// A property paired with its comparison literal.
///
/// `flipped` records that the literal appeared on the left of the operator;
/// both shapes normalize to the same internal form.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyLiteral {
    pub name: String,
    pub value: AttrValue,
    pub secondary: Option<AttrValue>,
    pub flipped: bool,
}

impl PropertyLiteral {
    /// Pair the two operands of a comparison. `(property, literal)` and
    /// `(literal, property)` pair up; `(literal, literal)` and
    /// `(property, property)` yield `None`; a call operand is unsupported.
    pub fn pair(lhs: &Expr, rhs: &Expr) -> GtResult<Option<PropertyLiteral>> {
        match (lhs, rhs) {
            (Expr::Property(name), Expr::Literal(value)) => Ok(Some(PropertyLiteral {
                name: name.clone(),
                value: value.clone(),
                secondary: None,
                flipped: false,
            })),
            (Expr::Literal(value), Expr::Property(name)) => Ok(Some(PropertyLiteral {
                name: name.clone(),
                value: value.clone(),
                secondary: None,
                flipped: true,
            })),
            (Expr::Literal(_), Expr::Literal(_)) | (Expr::Property(_), Expr::Property(_)) => {
                Ok(None)
            }
            (Expr::Call { name, .. }, _) | (_, Expr::Call { name, .. }) => Err(GtError::Filter(
                format!("unsupported expression in comparison: call to '{name}'"),
            )),
        }
    }
}

/// Canonicalize a filter: flatten nested `AND`/`OR` and cancel `NOT(NOT(x))`.
/// Deeper negations (`NOT(AND(..))`) pass through untouched.
pub fn normalize(f: Filter) -> Filter {
    match f {
        Filter::And(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                match normalize(child) {
                    Filter::And(grand) => flat.extend(grand),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                flat.remove(0)
            } else {
                Filter::And(flat)
            }
        }
        Filter::Or(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                match normalize(child) {
                    Filter::Or(grand) => flat.extend(grand),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                flat.remove(0)
            } else {
                Filter::Or(flat)
            }
        }
        Filter::Not(child) => match normalize(*child) {
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        },
        leaf => leaf,
    }
}

/// Split a filter into its top-level conjuncts.
pub fn conjuncts(f: Filter) -> Vec<Filter> {
    match normalize(f) {
        Filter::And(children) => children,
        other => vec![other],
    }
}

/// Classification of one conjunct against a schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConjunctKind {
    /// Spatial predicate on the default geometry.
    Spatial,
    /// Temporal predicate on the default date.
    Temporal,
    /// Property predicate; carries the attribute name.
    Attribute(String),
    /// Record id predicate.
    Id,
    /// Anything the planner treats as opaque residual.
    Other,
}

pub fn classify(f: &Filter, schema: &Schema) -> ConjunctKind {
    match f {
        Filter::IdIn(_) => ConjunctKind::Id,
        Filter::Eq { property, .. }
        | Filter::Compare { property, .. }
        | Filter::Between { property, .. }
        | Filter::Like { property, .. } => ConjunctKind::Attribute(property.clone()),
        Filter::Spatial { property, .. } => {
            match schema.default_geometry() {
                Some(geom) if geom.name == *property => ConjunctKind::Spatial,
                _ => ConjunctKind::Other,
            }
        }
        Filter::Temporal { property, .. } => {
            // A temporal operator over a non-default date attribute is an
            // attribute predicate: it can ride the attribute index.
            match schema.default_date() {
                Some(date) if date.name == *property => ConjunctKind::Temporal,
                _ => ConjunctKind::Attribute(property.clone()),
            }
        }
        _ => ConjunctKind::Other,
    }
}

/// Render a filter as ECQL text for server-side pushdown.
pub fn to_ecql(f: &Filter) -> String {
    match f {
        Filter::And(children) => join_ecql(children, " AND "),
        Filter::Or(children) => join_ecql(children, " OR "),
        Filter::Not(child) => format!("NOT ({})", to_ecql(child)),
        Filter::Eq { property, value } => format!("{property} = {}", value.ecql_literal()),
        Filter::Compare {
            op,
            property,
            value,
        } => format!("{property} {} {}", op.as_ecql(), value.ecql_literal()),
        Filter::Between { property, lo, hi } => format!(
            "{property} BETWEEN {} AND {}",
            lo.ecql_literal(),
            hi.ecql_literal()
        ),
        Filter::Like {
            property,
            pattern,
            case_insensitive,
        } => {
            let keyword = if *case_insensitive { "ILIKE" } else { "LIKE" };
            format!("{property} {keyword} '{}'", pattern.replace('\'', "''"))
        }
        Filter::IdIn(ids) => {
            let quoted: Vec<String> = ids.iter().map(|id| format!("'{id}'")).collect();
            format!("IN ({})", quoted.join(", "))
        }
        Filter::Spatial {
            op,
            property,
            geometry,
        } => match op {
            SpatialOp::BBox => {
                let (min, max) = polygon_bounds(geometry);
                format!(
                    "BBOX({property}, {}, {}, {}, {})",
                    min.x, min.y, max.x, max.y
                )
            }
            SpatialOp::Intersects => {
                format!("INTERSECTS({property}, {})", polygon_wkt(geometry))
            }
            SpatialOp::Within => format!("WITHIN({property}, {})", polygon_wkt(geometry)),
            SpatialOp::Contains => format!("CONTAINS({property}, {})", polygon_wkt(geometry)),
        },
        Filter::Temporal { op, property, time } => match op {
            TemporalOp::During => {
                format!("{property} DURING {}", time.as_interval().to_iso8601())
            }
            TemporalOp::Before => format!("{property} BEFORE {}", instant_text(time)),
            TemporalOp::After => format!("{property} AFTER {}", instant_text(time)),
            TemporalOp::Equals => format!("{property} TEQUALS {}", instant_text(time)),
        },
        Filter::IncludeAll => "INCLUDE".into(),
        Filter::ExcludeAll => "EXCLUDE".into(),
    }
}

fn join_ecql(children: &[Filter], sep: &str) -> String {
    let parts: Vec<String> = children
        .iter()
        .map(|c| match c {
            Filter::And(_) | Filter::Or(_) => format!("({})", to_ecql(c)),
            _ => to_ecql(c),
        })
        .collect();
    parts.join(sep)
}

fn instant_text(time: &TimeOperand) -> String {
    let t = match time {
        TimeOperand::Instant(t) => *t,
        TimeOperand::Range(i) => i.start(),
    };
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The axis-aligned rectangle `(min_x, min_y)..(max_x, max_y)` as a closed
/// counter-clockwise polygon.
pub fn rect_polygon(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    Rect::new(
        Coord { x: min_x, y: min_y },
        Coord { x: max_x, y: max_y },
    )
    .to_polygon()
}

/// Min and max corners of a polygon's exterior ring.
pub fn polygon_bounds(p: &Polygon<f64>) -> (Coord<f64>, Coord<f64>) {
    let mut min = Coord {
        x: f64::INFINITY,
        y: f64::INFINITY,
    };
    let mut max = Coord {
        x: f64::NEG_INFINITY,
        y: f64::NEG_INFINITY,
    };
    for c in &p.exterior().0 {
        min.x = min.x.min(c.x);
        min.y = min.y.min(c.y);
        max.x = max.x.max(c.x);
        max.y = max.y.max(c.y);
    }
    (min, max)
}

/// WKT text of a polygon's exterior ring.
pub fn polygon_wkt(p: &Polygon<f64>) -> String {
    let coords: Vec<String> = p
        .exterior()
        .0
        .iter()
        .map(|c| format!("{} {}", c.x, c.y))
        .collect();
    format!("POLYGON (({}))", coords.join(", "))
}

/// Parse WKT produced by [`polygon_wkt`] back into a polygon. Only the
/// single-exterior-ring form is accepted.
pub fn parse_polygon_wkt(text: &str) -> GtResult<Polygon<f64>> {
    let inner = text
        .trim()
        .strip_prefix("POLYGON ((")
        .and_then(|rest| rest.strip_suffix("))"))
        .ok_or_else(|| GtError::Filter(format!("malformed polygon text '{text}'")))?;
    let mut coords = Vec::new();
    for pair in inner.split(',') {
        let mut nums = pair.split_whitespace();
        let x: f64 = nums
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| GtError::Filter(format!("malformed coordinate '{pair}'")))?;
        let y: f64 = nums
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| GtError::Filter(format!("malformed coordinate '{pair}'")))?;
        coords.push(Coord { x, y });
    }
    if coords.len() < 4 {
        return Err(GtError::Filter(format!(
            "polygon needs at least four coordinates, got {}",
            coords.len()
        )));
    }
    Ok(Polygon::new(LineString::from(coords), vec![]))
}
