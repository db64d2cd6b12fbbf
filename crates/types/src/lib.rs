use chrono::{DateTime, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Semantic attribute types understood by the feature schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AttrType {
    Int,
    Long,
    Float,
    Double,
    Bool,
    String,
    Uuid,
    Date,
    Point,
    LineString,
    Polygon,
    Geometry,
}

impl AttrType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Int" => Self::Int,
            "Long" => Self::Long,
            "Float" => Self::Float,
            "Double" => Self::Double,
            "Bool" => Self::Bool,
            "String" => Self::String,
            "Uuid" => Self::Uuid,
            "Date" => Self::Date,
            "Point" => Self::Point,
            "LineString" => Self::LineString,
            "Polygon" => Self::Polygon,
            "Geometry" => Self::Geometry,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::Long => "Long",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::Bool => "Bool",
            Self::String => "String",
            Self::Uuid => "Uuid",
            Self::Date => "Date",
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::Geometry => "Geometry",
        }
    }

    pub fn is_geometry(&self) -> bool {
        matches!(
            self,
            Self::Point | Self::LineString | Self::Polygon | Self::Geometry
        )
    }

    /// Width in bytes of the sortable encoding, for fixed-width types.
    fn encoded_width(&self) -> Option<usize> {
        match self {
            Self::Int | Self::Float => Some(4),
            Self::Long | Self::Double | Self::Date => Some(8),
            Self::Bool => Some(1),
            Self::Uuid => Some(16),
            Self::String | Self::Point | Self::LineString | Self::Polygon | Self::Geometry => None,
        }
    }

    /// The encoding that sorts below every value of this type.
    pub fn min_key(&self) -> Vec<u8> {
        match self.encoded_width() {
            Some(w) => vec![0x00; w],
            None => Vec::new(),
        }
    }

    /// The encoding that sorts above every value of this type, when the
    /// type has a fixed-width encoding. Variable-width types have no
    /// greatest encoding; callers fall back to the key-space successor.
    pub fn max_key(&self) -> Option<Vec<u8>> {
        self.encoded_width().map(|w| vec![0xFF; w])
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal value appearing in a predicate.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AttrValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Text(String),
    Uuid(Uuid),
    Date(DateTime<Utc>),
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Self::Int(_) => AttrType::Int,
            Self::Long(_) => AttrType::Long,
            Self::Float(_) => AttrType::Float,
            Self::Double(_) => AttrType::Double,
            Self::Bool(_) => AttrType::Bool,
            Self::Text(_) => AttrType::String,
            Self::Uuid(_) => AttrType::Uuid,
            Self::Date(_) => AttrType::Date,
        }
    }

    pub fn cmp_same_type(&self, other: &AttrValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &AttrValue) -> Option<bool> {
        self.cmp_same_type(other).map(|ord| ord == Ordering::Equal)
    }

    /// Order-preserving index key encoding: for values `a < b` of the same
    /// type, `enc(a) < enc(b)` in byte order.
    ///
    /// Signed integers flip the sign bit and serialize big-endian; floats use
    /// the IEEE-754 total-order transform; dates encode their epoch millis.
    pub fn to_sortable_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int(v) => ((*v as u32) ^ 0x8000_0000).to_be_bytes().to_vec(),
            Self::Long(v) => ((*v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes().to_vec(),
            Self::Float(v) => {
                // -0.0 and 0.0 compare equal and must encode identically.
                let v = if *v == 0.0 { 0.0 } else { *v };
                let bits = v.to_bits();
                let flipped = if bits & 0x8000_0000 != 0 {
                    !bits
                } else {
                    bits | 0x8000_0000
                };
                flipped.to_be_bytes().to_vec()
            }
            Self::Double(v) => {
                let v = if *v == 0.0 { 0.0 } else { *v };
                let bits = v.to_bits();
                let flipped = if bits & 0x8000_0000_0000_0000 != 0 {
                    !bits
                } else {
                    bits | 0x8000_0000_0000_0000
                };
                flipped.to_be_bytes().to_vec()
            }
            Self::Bool(v) => vec![u8::from(*v)],
            Self::Text(v) => v.as_bytes().to_vec(),
            Self::Uuid(v) => v.as_bytes().to_vec(),
            Self::Date(v) => AttrValue::Long(v.timestamp_millis()).to_sortable_bytes(),
        }
    }

    /// Render as an ECQL literal. Text and uuids are single-quoted with
    /// embedded quotes doubled; dates use ISO 8601 UTC.
    pub fn ecql_literal(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Text(v) => format!("'{}'", v.replace('\'', "''")),
            Self::Uuid(v) => format!("'{v}'"),
            Self::Date(v) => v.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Closed interval over UTC instants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    /// Build an interval; endpoints are reordered if reversed.
    pub fn new(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn instant(t: DateTime<Utc>) -> Self {
        Self { start: t, end: t }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// An instant is an interval whose start equals its end.
    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// Intersection of two closed intervals; `None` when disjoint.
    pub fn overlap(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(Interval { start, end })
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// `start/end` in ISO 8601, the ECQL `DURING` operand form.
    pub fn to_iso8601(&self) -> String {
        format!(
            "{}/{}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}
