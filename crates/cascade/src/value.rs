//! Typed values and schemas.
//!
//! Every variable of a project has a [`VarKind`]. Values travel through the
//! scheduler as [`Value`]s, a small tagged union, and are always produced by
//! casting through the owning kind so that a combination drawn from the
//! sequencer compares equal to the same combination read back from a store.

use crate::error::{Error, Result};
use alloc::collections::BTreeMap;
use core::{cmp::Ordering, fmt};

/// A named set of field values: one combination, one payload, or one stored
/// row.
pub type Record = BTreeMap<String, Value>;

/// Name of the field that tags every stored record with the densification
/// level that produced it.
pub const LEVEL_FIELD: &str = "dens_level";

/// Storage kind of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum VarKind {
    Int64,
    UInt64,
    Int32,
    UInt32,
    UInt8,
    Float,
    Double,
    #[cfg_attr(feature = "serde", serde(alias = "string"))]
    Text,
}

impl VarKind {
    pub const ALL: [Self; 8] = [
        Self::Int64,
        Self::UInt64,
        Self::Int32,
        Self::UInt32,
        Self::UInt8,
        Self::Float,
        Self::Double,
        Self::Text,
    ];

    /// Stable code sent to worker fleets when describing a schema.
    pub const fn typecode(self) -> u8 {
        match self {
            Self::UInt32 => 1,
            Self::UInt64 => 2,
            Self::Float => 3,
            Self::Double => 4,
            Self::Int32 => 5,
            Self::Int64 => 6,
            Self::UInt8 => 7,
            Self::Text => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::UInt8 => "uint8",
            Self::Float => "float",
            Self::Double => "double",
            Self::Text => "text",
        }
    }

    /// Column type used by relational stores.
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Int64 | Self::Int32 | Self::UInt32 | Self::UInt8 => "INTEGER",
            // SQLite has no unsigned 64-bit integer; keep the full range.
            Self::UInt64 => "NUMERIC",
            Self::Float | Self::Double => "REAL",
            Self::Text => "TEXT",
        }
    }

    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Text)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .or_else(|| (name == "string").then_some(Self::Text))
    }

    /// Casts a sampled grid coordinate into this kind.
    ///
    /// Integer kinds truncate toward zero and saturate at their bounds,
    /// `Float` is rounded to single precision.
    pub fn cast(self, x: f64) -> Value {
        match self {
            Self::Int64 => Value::Int(x as i64),
            Self::Int32 => Value::Int(i64::from(x as i32)),
            Self::UInt64 => Value::UInt(x as u64),
            Self::UInt32 => Value::UInt(u64::from(x as u32)),
            Self::UInt8 => Value::UInt(u64::from(x as u8)),
            Self::Float => Value::Float(f64::from(x as f32)),
            Self::Double => Value::Float(x),
            Self::Text => Value::Text(format_float(x)),
        }
    }

    /// Converts an arbitrary value into this kind.
    ///
    /// Unlike [`VarKind::cast`], out-of-range integers and text that does
    /// not parse are rejected rather than saturated.
    pub fn coerce(self, name: &str, value: &Value) -> Result<Value> {
        let invalid = |reason: &str| Error::InvalidValue {
            name: name.to_string(),
            reason: format!("{reason} (expected {})", self.name()),
        };

        if self == Self::Text {
            return match value {
                Value::Text(s) => Ok(Value::Text(s.clone())),
                other => Ok(Value::Text(other.to_string())),
            };
        }

        let x = match value {
            Value::Int(i) => *i as f64,
            Value::UInt(u) => *u as f64,
            Value::Float(f) => *f,
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid("not a number"))?,
        };

        match self {
            Self::Float | Self::Double => Ok(self.cast(x)),
            _ => {
                if !x.is_finite() {
                    return Err(invalid("not finite"));
                }
                let (lo, hi) = self.integer_bounds();
                let t = x.trunc();
                if t < lo || t > hi {
                    return Err(invalid("out of range"));
                }
                // Exact integer inputs keep their full precision.
                match (self, value) {
                    (Self::Int64, Value::Int(i)) => Ok(Value::Int(*i)),
                    (Self::UInt64, Value::UInt(u)) => Ok(Value::UInt(*u)),
                    _ => Ok(self.cast(t)),
                }
            }
        }
    }

    fn integer_bounds(self) -> (f64, f64) {
        match self {
            Self::Int64 => (i64::MIN as f64, i64::MAX as f64),
            Self::UInt64 => (0.0, u64::MAX as f64),
            Self::Int32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
            Self::UInt32 => (0.0, f64::from(u32::MAX)),
            Self::UInt8 => (0.0, f64::from(u8::MAX)),
            Self::Float | Self::Double | Self::Text => (f64::MIN, f64::MAX),
        }
    }
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed value held by a [`Record`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::UInt(u) => Some(*u as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub const fn is_finite(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.partial_cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.partial_cmp(b),
            (Self::Text(_), _) | (_, Self::Text(_)) => None,
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(x) => f.write_str(&format_float(*x)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

/// Ordered `name -> kind` table.
///
/// Names are unique and must be plain identifiers so that every store can
/// use them as column names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<(String, VarKind)>,
}

impl Schema {
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builds a schema from `(name, kind)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on a duplicate or malformed name.
    pub fn from_fields<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, VarKind)>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for (name, kind) in fields {
            schema.push(name, kind)?;
        }
        Ok(schema)
    }

    /// Appends a field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on a duplicate or malformed name.
    pub fn push(&mut self, name: impl Into<String>, kind: VarKind) -> Result<()> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(Error::config(format!(
                "variable name '{name}' is not a valid identifier"
            )));
        }
        if name == LEVEL_FIELD {
            return Err(Error::config(format!(
                "variable name '{LEVEL_FIELD}' is reserved"
            )));
        }
        if self.contains(&name) {
            return Err(Error::config(format!("duplicate variable '{name}'")));
        }
        self.fields.push((name, kind));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<VarKind> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kind)| *kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, VarKind)> {
        self.fields.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Concatenates two schemas, rejecting any shared name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a name appears in both.
    pub fn merged(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        for (name, kind) in other.iter() {
            out.push(name, kind)?;
        }
        Ok(out)
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_kind_rounds_to_single_precision() {
        let v = VarKind::Float.cast(0.1);
        assert_eq!(v, Value::Float(f64::from(0.1_f32)));
        assert_ne!(v, Value::Float(0.1));
        assert_eq!(VarKind::Double.cast(0.1), Value::Float(0.1));
    }

    #[test]
    fn integer_kinds_truncate_toward_zero() {
        assert_eq!(VarKind::Int64.cast(-2.7), Value::Int(-2));
        assert_eq!(VarKind::UInt8.cast(300.0), Value::UInt(255));
        assert_eq!(VarKind::UInt32.cast(7.9), Value::UInt(7));
    }

    #[test]
    fn coerce_rejects_out_of_range_and_garbage() {
        assert!(matches!(
            VarKind::UInt8.coerce("n", &Value::Int(256)),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            VarKind::Int32.coerce("n", &Value::Text("abc".into())),
            Err(Error::InvalidValue { .. })
        ));
        assert_eq!(
            VarKind::Int32.coerce("n", &Value::Text(" 12 ".into())).unwrap(),
            Value::Int(12)
        );
        assert_eq!(
            VarKind::UInt64.coerce("n", &Value::UInt(u64::MAX)).unwrap(),
            Value::UInt(u64::MAX)
        );
    }

    #[test]
    fn mixed_numeric_values_compare() {
        assert!(Value::Int(3) < Value::Float(3.5));
        assert!(Value::UInt(4) > Value::Float(3.5));
        assert_eq!(Value::Text("a".into()).partial_cmp(&Value::Int(1)), None);
    }

    #[test]
    fn schema_rejects_duplicates_and_bad_names() {
        let mut schema = Schema::new();
        schema.push("X", VarKind::Double).unwrap();
        assert!(schema.push("X", VarKind::Float).is_err());
        assert!(schema.push("1x", VarKind::Float).is_err());
        assert!(schema.push("a-b", VarKind::Float).is_err());
        assert!(schema.push(LEVEL_FIELD, VarKind::UInt32).is_err());
        assert_eq!(schema.len(), 1);
    }

    #[test]
    fn merged_schema_refuses_overlap() {
        let inputs = Schema::from_fields([("X", VarKind::Double)]).unwrap();
        let outputs = Schema::from_fields([("E", VarKind::Double)]).unwrap();
        let clash = Schema::from_fields([("X", VarKind::Int64)]).unwrap();

        let all = inputs.merged(&outputs).unwrap();
        assert_eq!(all.names().collect::<Vec<_>>(), ["X", "E"]);
        assert!(inputs.merged(&clash).is_err());
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in VarKind::ALL {
            assert_eq!(VarKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(VarKind::from_name("string"), Some(VarKind::Text));
        assert_eq!(VarKind::from_name("complex"), None);
    }
}
