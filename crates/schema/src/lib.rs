//! Feature type descriptors and the schema string grammar.
//!
//! A [`Schema`] is an ordered list of typed attributes plus a type name. It is
//! parsed from (and renders back to) the grammar
//! `name:type[:opt=val...](,name:type...)*` with per-attribute options
//! `index=`, `cardinality=`, `srid=` (geometry only) and `default=`.
//! Options may also continue after a comma (`opt=val` chunks with no type
//! position are folded into the preceding attribute).

use ahash::RandomState;
use common::{GtError, GtResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use types::AttrType;

type Map<K, V> = HashMap<K, V, RandomState>;

/// User-declared selectivity class of an attribute. The planner trusts it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    High,
    #[default]
    Unknown,
    Low,
}

impl Cardinality {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "high" => Self::High,
            "unknown" => Self::Unknown,
            "low" => Self::Low,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Unknown => "unknown",
            Self::Low => "low",
        }
    }
}

/// Describes one attribute of a feature type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub ty: AttrType,
    pub indexed: bool,
    pub cardinality: Cardinality,
    /// Marks the default geometry or default date attribute.
    pub default: bool,
    /// Spatial reference id, geometry types only.
    pub srid: Option<i32>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: AttrType) -> Self {
        Self {
            name: name.into(),
            ty,
            indexed: false,
            cardinality: Cardinality::Unknown,
            default: false,
            srid: None,
        }
    }
}

/// An ordered feature type: attributes plus a type name.
///
/// The canonical wire form is the grammar text (`encoded`/`parse`), not a
/// serde representation.
#[derive(Clone, Debug)]
pub struct Schema {
    type_name: String,
    attributes: Vec<Attribute>,
    ordinals: Map<String, usize>,
}

impl Schema {
    /// Build a schema, validating attribute names and default flags.
    pub fn new(type_name: impl Into<String>, attributes: Vec<Attribute>) -> GtResult<Self> {
        if attributes.is_empty() {
            return Err(GtError::Schema(
                "feature type must contain at least one attribute".into(),
            ));
        }
        let mut ordinals = Map::default();
        let mut default_geom: Option<&str> = None;
        let mut default_date: Option<&str> = None;
        for (idx, attr) in attributes.iter().enumerate() {
            if ordinals.insert(attr.name.clone(), idx).is_some() {
                return Err(GtError::Schema(format!(
                    "duplicate attribute '{}' found while building schema",
                    attr.name
                )));
            }
            if attr.srid.is_some() && !attr.ty.is_geometry() {
                return Err(GtError::Schema(format!(
                    "srid on non-geometry attribute '{}'",
                    attr.name
                )));
            }
            if attr.default {
                if attr.ty.is_geometry() {
                    if let Some(prev) = default_geom {
                        return Err(GtError::Schema(format!(
                            "conflicting default geometries '{prev}' and '{}'",
                            attr.name
                        )));
                    }
                    default_geom = Some(&attr.name);
                } else if attr.ty == AttrType::Date {
                    if let Some(prev) = default_date {
                        return Err(GtError::Schema(format!(
                            "conflicting default dates '{prev}' and '{}'",
                            attr.name
                        )));
                    }
                    default_date = Some(&attr.name);
                } else {
                    return Err(GtError::Schema(format!(
                        "default flag on non-geometry, non-date attribute '{}'",
                        attr.name
                    )));
                }
            }
        }
        Ok(Self {
            type_name: type_name.into(),
            attributes,
            ordinals,
        })
    }

    /// Parse the schema grammar. See the module docs for the accepted form.
    pub fn parse(type_name: &str, spec: &str) -> GtResult<Self> {
        let mut attributes: Vec<Attribute> = Vec::new();
        for chunk in spec.split(',') {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                return Err(GtError::Schema("empty attribute specification".into()));
            }
            if !chunk.contains(':') && chunk.contains('=') {
                // Comma-continued option belonging to the previous attribute.
                let attr = attributes.last_mut().ok_or_else(|| {
                    GtError::Schema(format!("option '{chunk}' precedes any attribute"))
                })?;
                apply_option(attr, chunk)?;
                continue;
            }
            let mut parts = chunk.split(':');
            let name = parts
                .next()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| GtError::Schema(format!("missing attribute name in '{chunk}'")))?;
            let ty_text = parts
                .next()
                .ok_or_else(|| GtError::Schema(format!("missing type for attribute '{name}'")))?;
            let ty = AttrType::parse(ty_text)
                .ok_or_else(|| GtError::Schema(format!("unknown type '{ty_text}'")))?;
            let mut attr = Attribute::new(name, ty);
            for opt in parts {
                apply_option(&mut attr, opt)?;
            }
            attributes.push(attr);
        }
        Self::new(type_name, attributes)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.ordinals.get(name).map(|&idx| &self.attributes[idx])
    }

    /// The attribute flagged as the default geometry, falling back to the
    /// first geometry-typed attribute.
    pub fn default_geometry(&self) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.default && a.ty.is_geometry())
            .or_else(|| self.attributes.iter().find(|a| a.ty.is_geometry()))
    }

    /// The attribute flagged as the default date, falling back to the first
    /// `Date` attribute.
    pub fn default_date(&self) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.default && a.ty == AttrType::Date)
            .or_else(|| self.attributes.iter().find(|a| a.ty == AttrType::Date))
    }

    /// Canonical grammar text. Options at their defaults are omitted, so
    /// `parse(type_name, &s.encoded())` reproduces `s`.
    pub fn encoded(&self) -> String {
        let mut out = String::new();
        for (idx, attr) in self.attributes.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&attr.name);
            out.push(':');
            out.push_str(attr.ty.as_str());
            if attr.indexed {
                out.push_str(":index=true");
            }
            if attr.cardinality != Cardinality::Unknown {
                out.push_str(":cardinality=");
                out.push_str(attr.cardinality.as_str());
            }
            if let Some(srid) = attr.srid {
                out.push_str(&format!(":srid={srid}"));
            }
            if attr.default {
                out.push_str(":default=true");
            }
        }
        out
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.attributes == other.attributes
    }
}

fn apply_option(attr: &mut Attribute, opt: &str) -> GtResult<()> {
    let (key, value) = opt.split_once('=').ok_or_else(|| {
        GtError::Schema(format!(
            "malformed option '{opt}' on attribute '{}'",
            attr.name
        ))
    })?;
    match key {
        "index" => {
            attr.indexed = parse_bool(value, attr, "index")?;
        }
        "cardinality" => {
            attr.cardinality = Cardinality::parse(value).ok_or_else(|| {
                GtError::Schema(format!(
                    "invalid cardinality '{value}' on attribute '{}'",
                    attr.name
                ))
            })?;
        }
        "srid" => {
            if !attr.ty.is_geometry() {
                return Err(GtError::Schema(format!(
                    "srid on non-geometry attribute '{}'",
                    attr.name
                )));
            }
            attr.srid = Some(value.parse().map_err(|_| {
                GtError::Schema(format!("invalid srid '{value}' on attribute '{}'", attr.name))
            })?);
        }
        "default" => {
            attr.default = parse_bool(value, attr, "default")?;
        }
        _ => {
            return Err(GtError::Schema(format!(
                "unknown option '{key}' on attribute '{}'",
                attr.name
            )));
        }
    }
    Ok(())
}

fn parse_bool(value: &str, attr: &Attribute, key: &str) -> GtResult<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(GtError::Schema(format!(
            "invalid {key} value '{value}' on attribute '{}'",
            attr.name
        ))),
    }
}
