//! Odometer enumeration of a multi-dimensional parameter grid.
//!
//! A [`Sequencer`] composes named [`ValueRange`]s into a mixed-radix counter.
//! Dimension 0 is the least significant digit: it changes on every call to
//! [`Sequencer::next`], and a carry moves to the next dimension each time a
//! digit wraps. Every point of the Cartesian product is emitted exactly
//! once, always in the same order.

use crate::{
    error::{Error, Result},
    range::ValueRange,
    value::{Record, Schema, Value, VarKind},
};
use alloc::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// New bounds for one dimension, as produced by densification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

impl Bounds {
    pub const fn new(start: f64, end: f64, count: usize) -> Self {
        Self { start, end, count }
    }
}

/// One named axis of the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    name: String,
    kind: VarKind,
    range: ValueRange,
    len: usize,
}

impl Dimension {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unbounded constant range, or a
    /// numeric range on a text variable.
    pub fn new(name: impl Into<String>, kind: VarKind, range: ValueRange) -> Result<Self> {
        let name = name.into();
        let Some(len) = range.len() else {
            return Err(Error::config(format!(
                "dimension '{name}' has no repeat bound"
            )));
        };
        if !kind.is_numeric() && !range.is_degenerate() {
            return Err(Error::config(format!(
                "dimension '{name}' is text and cannot span a numeric range"
            )));
        }
        Ok(Self {
            name,
            kind,
            range,
            len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn kind(&self) -> VarKind {
        self.kind
    }

    pub const fn range(&self) -> &ValueRange {
        &self.range
    }

    /// Number of samples along this axis.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn sample(&self, index: usize) -> Value {
        self.kind.cast(self.range.value(index))
    }
}

/// Deterministic enumerator of every combination of its dimensions.
///
/// `Clone` produces a fully independent snapshot.
///
/// # Example
///
/// ```
/// use cascade::{Sequencer, ValueRange, Value, VarKind};
///
/// let mut seq = Sequencer::builder()
///     .dimension("X", VarKind::Double, ValueRange::linear(0.0, 10.0, 2).unwrap())
///     .dimension("Y", VarKind::Double, ValueRange::linear(0.0, 1.0, 1).unwrap())
///     .build()
///     .unwrap();
///
/// assert_eq!(seq.total(), 6);
/// let first = seq.next().unwrap();
/// assert_eq!(first["X"], Value::Float(0.0));
/// let second = seq.next().unwrap();
/// assert_eq!(second["X"], Value::Float(5.0));
/// assert_eq!(second["Y"], Value::Float(0.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Sequencer {
    dimensions: Vec<Dimension>,
    indices: Vec<usize>,
    current: Vec<Value>,
    total: u64,
    realized: u64,
    overflow: bool,
}

impl Sequencer {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on duplicate dimension names.
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self> {
        let mut seen = Schema::new();
        for dim in &dimensions {
            seen.push(dim.name(), dim.kind())?;
        }
        let mut seq = Self {
            dimensions,
            indices: Vec::new(),
            current: Vec::new(),
            total: 0,
            realized: 0,
            overflow: false,
        };
        seq.reset();
        Ok(seq)
    }

    pub fn builder() -> SequencerBuilder {
        SequencerBuilder::default()
    }

    /// Advances by exactly one combination.
    ///
    /// Returns `None` once every combination has been produced, and keeps
    /// returning `None` until [`Sequencer::reset`] or
    /// [`Sequencer::reload_bounds`].
    #[allow(clippy::should_implement_trait)]
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next(&mut self) -> Option<Record> {
        // An empty dimension empties the whole product.
        if self.overflow || self.total == 0 {
            self.overflow = true;
            return None;
        }

        // Propagate the carry.
        let n = self.indices.len();
        let mut i = 0;
        while i < n && self.indices[i] >= self.dimensions[i].len() {
            self.indices[i] = 0;
            i += 1;
            if i < n {
                self.indices[i] += 1;
            }
        }

        if i >= n {
            self.overflow = true;
            return None;
        }

        // Digits 0..=i moved; the rest still hold their previous sample.
        for j in 0..=i {
            self.current[j] = self.dimensions[j].sample(self.indices[j]);
        }

        let combination = self
            .dimensions
            .iter()
            .zip(&self.current)
            .map(|(dim, v)| (dim.name.clone(), v.clone()))
            .collect();

        self.indices[0] += 1;
        self.realized += 1;

        Some(combination)
    }

    /// Rewinds to the first combination and recomputes the total.
    pub fn reset(&mut self) {
        self.indices = vec![0; self.dimensions.len()];
        self.current = self.dimensions.iter().map(|d| d.sample(0)).collect();
        self.total = if self.dimensions.is_empty() {
            0
        } else {
            self.dimensions
                .iter()
                .map(|d| d.len() as u64)
                .fold(1_u64, u64::saturating_mul)
        };
        self.realized = 0;
        self.overflow = false;
    }

    /// Replaces the bounds of the named dimensions, keeping their spacing,
    /// then resets the enumeration.
    ///
    /// Names that do not match a dimension are ignored; dimensions that are
    /// not named keep their configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a new range is invalid. The
    /// sequencer is left untouched in that case.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn reload_bounds(&mut self, bounds: &BTreeMap<String, Bounds>) -> Result<()> {
        let mut dimensions = self.dimensions.clone();
        for dim in &mut dimensions {
            if let Some(b) = bounds.get(dim.name()) {
                let range = dim.range.with_bounds(b.start, b.end, b.count)?;
                *dim = Dimension::new(dim.name.clone(), dim.kind, range)?;
            }
        }
        self.dimensions = dimensions;
        self.reset();
        Ok(())
    }

    /// The configured step count of a dimension.
    pub fn iterations_for(&self, name: &str) -> Option<usize> {
        self.dimension(name).and_then(|d| d.range().count())
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name() == name)
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// The input schema described by the dimensions.
    pub fn schema(&self) -> Schema {
        let mut schema = Schema::new();
        for dim in &self.dimensions {
            // Names were validated as unique at construction.
            let _ = schema.push(dim.name(), dim.kind());
        }
        schema
    }

    /// Number of combinations in a full pass.
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Number of combinations produced since the last reset.
    pub const fn realized(&self) -> u64 {
        self.realized
    }

    pub const fn is_exhausted(&self) -> bool {
        self.overflow
    }
}

/// Incremental constructor for [`Sequencer`].
#[derive(Debug, Default)]
pub struct SequencerBuilder {
    dimensions: Vec<(String, VarKind, ValueRange)>,
}

impl SequencerBuilder {
    pub fn dimension(mut self, name: impl Into<String>, kind: VarKind, range: ValueRange) -> Self {
        self.dimensions.push((name.into(), kind, range));
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a dimension is invalid or a name
    /// is repeated.
    pub fn build(self) -> Result<Sequencer> {
        let dimensions = self
            .dimensions
            .into_iter()
            .map(|(name, kind, range)| Dimension::new(name, kind, range))
            .collect::<Result<Vec<_>>>()?;
        Sequencer::new(dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn lin(start: f64, end: f64, count: usize) -> ValueRange {
        ValueRange::linear(start, end, count).unwrap()
    }

    fn drain(seq: &mut Sequencer) -> Vec<Record> {
        core::iter::from_fn(|| seq.next()).collect()
    }

    fn key(r: &Record) -> String {
        r.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn enumerates_cartesian_product_in_odometer_order() {
        let mut seq = Sequencer::builder()
            .dimension("X", VarKind::Double, lin(0.0, 10.0, 2))
            .dimension("Y", VarKind::Double, lin(0.0, 1.0, 1))
            .build()
            .unwrap();
        assert_eq!(seq.total(), 6);

        let got: Vec<(f64, f64)> = drain(&mut seq)
            .iter()
            .map(|r| (r["X"].as_f64().unwrap(), r["Y"].as_f64().unwrap()))
            .collect();
        assert_eq!(
            got,
            [
                (0.0, 0.0),
                (5.0, 0.0),
                (10.0, 0.0),
                (0.0, 1.0),
                (5.0, 1.0),
                (10.0, 1.0)
            ]
        );
        assert_eq!(seq.realized(), 6);
        assert!(seq.is_exhausted());
    }

    #[test]
    fn every_combination_exactly_once() {
        let mut seq = Sequencer::builder()
            .dimension("a", VarKind::Int64, lin(0.0, 3.0, 3))
            .dimension("b", VarKind::Double, lin(-1.0, 1.0, 4))
            .dimension("c", VarKind::UInt8, lin(0.0, 2.0, 2))
            .build()
            .unwrap();
        let all = drain(&mut seq);
        assert_eq!(all.len() as u64, seq.total());
        assert_eq!(all.len(), 4 * 5 * 3);
        let unique: HashSet<_> = all.iter().map(key).collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn exhaustion_is_permanent_until_reset() {
        let mut seq = Sequencer::builder()
            .dimension("X", VarKind::Double, lin(0.0, 1.0, 1))
            .build()
            .unwrap();
        assert_eq!(drain(&mut seq).len(), 2);
        for _ in 0..5 {
            assert_eq!(seq.next(), None);
        }
        seq.reset();
        assert_eq!(seq.realized(), 0);
        assert_eq!(drain(&mut seq).len(), 2);
    }

    #[test]
    fn degenerate_dimension_repeats_then_exhausts() {
        let mut seq = Sequencer::builder()
            .dimension("D", VarKind::Double, ValueRange::constant(3.5, 4).unwrap())
            .build()
            .unwrap();
        let all = drain(&mut seq);
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|r| r["D"] == Value::Float(3.5)));
        assert_eq!(seq.next(), None);
    }

    #[test]
    fn no_dimensions_means_no_work() {
        let mut seq = Sequencer::new(Vec::new()).unwrap();
        assert_eq!(seq.total(), 0);
        assert_eq!(seq.next(), None);
        assert!(seq.is_exhausted());
    }

    #[test]
    fn empty_dimension_means_no_work() {
        let mut seq = Sequencer::builder()
            .dimension("X", VarKind::Double, lin(0.0, 1.0, 3))
            .dimension("D", VarKind::Double, ValueRange::constant(1.0, 0).unwrap())
            .build()
            .unwrap();
        assert_eq!(seq.total(), 0);
        assert_eq!(seq.next(), None);
        assert_eq!(seq.realized(), 0);
        assert!(seq.is_exhausted());
    }

    #[test]
    fn empty_middle_dimension_yields_nothing_after_reload() {
        let mut seq = Sequencer::builder()
            .dimension("X", VarKind::Double, lin(0.0, 1.0, 3))
            .dimension("D", VarKind::Double, ValueRange::constant(1.0, 0).unwrap())
            .dimension("Y", VarKind::Double, lin(0.0, 1.0, 1))
            .build()
            .unwrap();
        assert!(drain(&mut seq).is_empty());

        let mut bounds = BTreeMap::new();
        bounds.insert("X".to_string(), Bounds::new(0.0, 1.0, 1));
        seq.reload_bounds(&bounds).unwrap();
        assert_eq!(seq.total(), 0);
        assert!(drain(&mut seq).is_empty());
    }

    #[test]
    fn unbounded_dimension_is_rejected() {
        let err = Sequencer::builder()
            .dimension("D", VarKind::Double, ValueRange::unbounded_constant(1.0).unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn duplicate_dimension_is_rejected() {
        assert!(
            Sequencer::builder()
                .dimension("X", VarKind::Double, lin(0.0, 1.0, 1))
                .dimension("X", VarKind::Double, lin(0.0, 1.0, 1))
                .build()
                .is_err()
        );
    }

    #[test]
    fn reload_discards_progress_and_keeps_unnamed_dimensions() {
        let mut seq = Sequencer::builder()
            .dimension("X", VarKind::Double, lin(0.0, 10.0, 10))
            .dimension("R", VarKind::UInt32, ValueRange::constant(1.0, 2).unwrap())
            .build()
            .unwrap();
        for _ in 0..7 {
            seq.next();
        }

        let mut bounds = BTreeMap::new();
        bounds.insert("X".to_string(), Bounds::new(5.0, 10.0, 10));
        bounds.insert("unknown".to_string(), Bounds::new(0.0, 1.0, 1));
        seq.reload_bounds(&bounds).unwrap();

        assert_eq!(seq.realized(), 0);
        assert_eq!(seq.total(), 11 * 2);
        assert_eq!(seq.iterations_for("X"), Some(10));
        assert_eq!(seq.iterations_for("R"), Some(2));
        assert_eq!(seq.iterations_for("unknown"), None);

        let all = drain(&mut seq);
        assert_eq!(all.len(), 22);
        assert_eq!(all[0]["X"], Value::Float(5.0));
        assert_eq!(all[10]["X"], Value::Float(10.0));
        assert_eq!(all[11]["R"], Value::UInt(1));
    }

    #[test]
    fn reload_preserves_spacing_function() {
        let mut seq = Sequencer::builder()
            .dimension("K", VarKind::Double, ValueRange::logarithmic(1.0, 100.0, 2).unwrap())
            .build()
            .unwrap();
        let mut bounds = BTreeMap::new();
        bounds.insert("K".to_string(), Bounds::new(10.0, 1000.0, 2));
        seq.reload_bounds(&bounds).unwrap();

        let all = drain(&mut seq);
        assert_eq!(all.len(), 3);
        assert!((all[1]["K"].as_f64().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_reload_leaves_sequencer_untouched() {
        let mut seq = Sequencer::builder()
            .dimension("X", VarKind::Double, lin(0.0, 1.0, 1))
            .build()
            .unwrap();
        seq.next();
        let before = seq.clone();

        let mut bounds = BTreeMap::new();
        bounds.insert("X".to_string(), Bounds::new(0.0, 1.0, 0));
        assert!(seq.reload_bounds(&bounds).is_err());
        assert_eq!(seq, before);
    }

    #[test]
    fn snapshot_is_independent() {
        let mut seq = Sequencer::builder()
            .dimension("X", VarKind::Double, lin(0.0, 1.0, 4))
            .build()
            .unwrap();
        let snapshot = seq.clone();

        let mut bounds = BTreeMap::new();
        bounds.insert("X".to_string(), Bounds::new(0.0, 0.5, 8));
        seq.reload_bounds(&bounds).unwrap();

        assert_eq!(snapshot.iterations_for("X"), Some(4));
        assert_eq!(seq.iterations_for("X"), Some(8));
    }

    #[test]
    fn values_are_cast_to_dimension_kind() {
        let mut seq = Sequencer::builder()
            .dimension("n", VarKind::UInt32, lin(0.0, 9.0, 2))
            .build()
            .unwrap();
        let all = drain(&mut seq);
        assert_eq!(
            all.iter().map(|r| r["n"].clone()).collect::<Vec<_>>(),
            [Value::UInt(0), Value::UInt(4), Value::UInt(9)]
        );
    }
}
