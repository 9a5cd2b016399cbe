//! Adaptive narrowing of the search grid around the best results.
//!
//! After a full sweep at level `L`, the [`Densifier`] ranks every record of
//! level `L` by the target variable and keeps the best fraction of them. For
//! each kept record it yields a [`Candidate`]: per dimension, the interval
//! spanned by the record's nearest stored neighbors. The scheduler turns each
//! candidate into a finer grid and enumerates it at level `L + 1`.

use crate::{
    error::{Error, Result},
    sequencer::{Bounds, Sequencer},
    store::ResultStore,
    value::{LEVEL_FIELD, Record, Schema, Value},
};
use alloc::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A kept record's value along one dimension and its closest neighbors.
///
/// A missing neighbor defaults to `center`, so a boundary dimension
/// collapses to a single point.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighborhood {
    pub center: Value,
    pub lower: Value,
    pub upper: Value,
}

/// Per-dimension neighborhoods of one kept record.
pub type Candidate = BTreeMap<String, Neighborhood>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DensifyState {
    Idle,
    Densifying,
}

/// Selection state of the current densification pass.
#[derive(Debug, Clone)]
pub struct Densifier {
    state: DensifyState,
    level: u32,
    target: String,
    keep_fraction: f64,
    offset: u64,
    limit: u64,
    warned_empty: bool,
}

impl Densifier {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless `keep_fraction` is in
    /// `(0, 1]`.
    pub fn new(target: impl Into<String>, keep_fraction: f64) -> Result<Self> {
        if !(keep_fraction > 0.0 && keep_fraction <= 1.0) {
            return Err(Error::config(format!(
                "keep fraction must be in (0, 1] (got {keep_fraction})"
            )));
        }
        Ok(Self {
            state: DensifyState::Idle,
            level: 1,
            target: target.into(),
            keep_fraction,
            offset: 0,
            limit: 0,
            warned_empty: false,
        })
    }

    /// Level of the records currently being produced.
    pub const fn level(&self) -> u32 {
        self.level
    }

    pub const fn state(&self) -> DensifyState {
        self.state
    }

    pub const fn is_active(&self) -> bool {
        matches!(self.state, DensifyState::Densifying)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of candidates handed out in the current pass.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of candidates the current pass keeps.
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Opens a new pass over the records of the current level and moves to
    /// the next level.
    ///
    /// The first pass keeps `ceil(keep_fraction * count)` records. Later
    /// passes divide by the previous limit, since every candidate of the
    /// previous pass produced a whole sub-grid of records.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(level = self.level)))]
    pub fn start<S: ResultStore + ?Sized>(&mut self, store: &S) -> Result<u64> {
        let count = store.record_count(self.level)? as f64;
        let kept = if self.level == 1 {
            self.keep_fraction * count
        } else {
            self.keep_fraction * count / self.limit.max(1) as f64
        };
        let limit = kept.ceil() as u64;

        if limit == 0 && !self.warned_empty {
            self.warned_empty = true;
            #[cfg(feature = "tracing")]
            tracing::warn!(
                level = self.level,
                "No record to densify at this level; results were probably computed by a previous run"
            );
        }

        self.limit = limit;
        self.offset = 0;
        self.level += 1;
        self.state = DensifyState::Densifying;

        #[cfg(feature = "tracing")]
        tracing::info!(level = self.level, limit, "Densification started");

        Ok(limit)
    }

    /// Yields the neighborhoods of the next kept record.
    ///
    /// `schema` lists the dimensions to narrow. Returns `None`, and goes
    /// back to [`DensifyState::Idle`], once the pass has no record left.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the ranked record lacks a dimension or
    /// the store fails.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(offset = self.offset)))]
    pub fn next_candidate<S: ResultStore + ?Sized>(
        &mut self,
        store: &S,
        schema: &Schema,
    ) -> Result<Option<Candidate>> {
        if !self.is_active() {
            return Ok(None);
        }
        if self.offset >= self.limit {
            self.state = DensifyState::Idle;
            return Ok(None);
        }

        let source = self.level - 1;
        let Some(record) = store.top_by_level(source, &self.target, true, self.offset)? else {
            self.state = DensifyState::Idle;
            return Ok(None);
        };
        self.offset += 1;

        let dims: Vec<&str> = schema
            .names()
            .filter(|n| *n != self.target && *n != LEVEL_FIELD)
            .collect();

        let mut fixed = Record::new();
        for name in &dims {
            let value = record.get(*name).ok_or_else(|| {
                Error::storage(format!("ranked record has no value for '{name}'"))
            })?;
            fixed.insert((*name).to_string(), value.clone());
        }

        let mut candidate = Candidate::new();
        for name in dims {
            let center = fixed[name].clone();
            let bounds = store.neighbor_bounds(source, &fixed, name)?;
            candidate.insert(
                name.to_string(),
                Neighborhood {
                    lower: bounds.lower.unwrap_or_else(|| center.clone()),
                    upper: bounds.upper.unwrap_or_else(|| center.clone()),
                    center,
                },
            );
        }

        if self.offset >= self.limit {
            self.state = DensifyState::Idle;
        }
        Ok(Some(candidate))
    }
}

/// Turns a candidate into sequencer bounds.
///
/// A dimension whose neighbors differ gets
/// `floor(amplification^(1/d) * previous_count)` steps, `d` being the number
/// of such dimensions (at least 1) and `previous_count` its step count in
/// `previous`. A collapsed dimension gets a single step.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if a neighborhood is not numeric.
pub fn narrowed_bounds(
    candidate: &Candidate,
    previous: &Sequencer,
    amplification: f64,
) -> Result<BTreeMap<String, Bounds>> {
    let mut spans = Vec::with_capacity(candidate.len());
    for (name, hood) in candidate {
        let (Some(lower), Some(upper)) = (hood.lower.as_f64(), hood.upper.as_f64()) else {
            return Err(Error::config(format!(
                "dimension '{name}' is not numeric and cannot be densified"
            )));
        };
        spans.push((name, lower, upper));
    }

    let distinct = spans.iter().filter(|(_, lo, hi)| lo != hi).count().max(1);
    let factor = amplification.powf(1.0 / distinct as f64);

    Ok(spans
        .into_iter()
        .map(|(name, lower, upper)| {
            let count = if lower == upper {
                1
            } else {
                let previous = previous.iterations_for(name).unwrap_or(1) as f64;
                // Absorb drift such as 8^(1/3) = 1.9999999999999998.
                ((factor * previous + 1e-9).floor() as usize).max(1)
            };
            (name.clone(), Bounds::new(lower, upper, count))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, ValueRange, VarKind};

    fn schema() -> Schema {
        Schema::from_fields([("X", VarKind::Double), ("E", VarKind::Double)]).unwrap()
    }

    fn store_with(points: &[(f64, f64, u32)]) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.ensure_schema(&schema()).unwrap();
        for (x, e, level) in points {
            let mut r = Record::new();
            r.insert("X".into(), Value::Float(*x));
            r.insert("E".into(), Value::Float(*e));
            r.insert(LEVEL_FIELD.into(), Value::UInt(u64::from(*level)));
            store.insert(&r).unwrap();
        }
        store
    }

    fn dens_schema() -> Schema {
        Schema::from_fields([("X", VarKind::Double)]).unwrap()
    }

    #[test]
    fn keep_fraction_must_be_in_unit_interval() {
        assert!(Densifier::new("E", 0.0).is_err());
        assert!(Densifier::new("E", 1.5).is_err());
        assert!(Densifier::new("E", f64::NAN).is_err());
        assert!(Densifier::new("E", 1.0).is_ok());
    }

    #[test]
    fn first_pass_keeps_ceil_of_fraction() {
        let store = store_with(&[(0.0, 1.0, 1), (5.0, 4.0, 1), (7.0, 9.0, 1), (10.0, 2.0, 1)]);
        let mut d = Densifier::new("E", 0.3).unwrap();
        assert_eq!(d.start(&store).unwrap(), 2);
        assert_eq!(d.level(), 2);
        assert!(d.is_active());
    }

    #[test]
    fn candidate_neighbors_come_from_previous_level() {
        let store = store_with(&[(0.0, 1.0, 1), (5.0, 4.0, 1), (7.0, 9.0, 1), (10.0, 2.0, 1)]);
        let mut d = Densifier::new("E", 0.5).unwrap();
        d.start(&store).unwrap();

        let best = d.next_candidate(&store, &dens_schema()).unwrap().unwrap();
        assert_eq!(
            best["X"],
            Neighborhood {
                center: Value::Float(7.0),
                lower: Value::Float(5.0),
                upper: Value::Float(10.0),
            }
        );
        assert_eq!(d.offset(), 1);
        assert!(d.is_active());

        let second = d.next_candidate(&store, &dens_schema()).unwrap().unwrap();
        assert_eq!(second["X"].center, Value::Float(5.0));
        assert_eq!(second["X"].lower, Value::Float(0.0));
        assert_eq!(second["X"].upper, Value::Float(7.0));
        // Limit reached on the final candidate.
        assert!(!d.is_active());
        assert_eq!(d.next_candidate(&store, &dens_schema()).unwrap(), None);
    }

    #[test]
    fn boundary_dimension_collapses_to_center() {
        let store = store_with(&[(0.0, 9.0, 1), (5.0, 4.0, 1)]);
        let mut d = Densifier::new("E", 0.5).unwrap();
        d.start(&store).unwrap();
        let c = d.next_candidate(&store, &dens_schema()).unwrap().unwrap();
        assert_eq!(c["X"].lower, Value::Float(0.0));
        assert_eq!(c["X"].upper, Value::Float(5.0));
        assert_eq!(c["X"].center, Value::Float(0.0));
    }

    #[test]
    fn empty_level_is_not_an_error() {
        let store = store_with(&[]);
        let mut d = Densifier::new("E", 0.5).unwrap();
        assert_eq!(d.start(&store).unwrap(), 0);
        assert!(d.is_active());
        assert_eq!(d.next_candidate(&store, &dens_schema()).unwrap(), None);
        assert!(!d.is_active());
        // A second empty pass does not fail either.
        assert_eq!(d.start(&store).unwrap(), 0);
        assert_eq!(d.level(), 3);
    }

    #[test]
    fn later_passes_normalize_by_previous_limit() {
        let mut points = vec![(0.0, 1.0, 1), (5.0, 4.0, 1), (7.0, 9.0, 1), (10.0, 2.0, 1)];
        for i in 0..12 {
            points.push((5.0 + f64::from(i) * 0.25, f64::from(i), 2));
        }
        let store = store_with(&points);
        let mut d = Densifier::new("E", 0.5).unwrap();
        assert_eq!(d.start(&store).unwrap(), 2);
        while d.next_candidate(&store, &dens_schema()).unwrap().is_some() {}
        // ceil(0.5 * 12 / 2)
        assert_eq!(d.start(&store).unwrap(), 3);
        assert_eq!(d.level(), 3);

        let best = d.next_candidate(&store, &dens_schema()).unwrap().unwrap();
        assert_eq!(best["X"].center, Value::Float(7.75));
        assert_eq!(best["X"].lower, Value::Float(7.5));
        assert_eq!(best["X"].upper, Value::Float(7.75));
    }

    #[test]
    fn narrowing_keeps_step_count_at_unit_amplification() {
        let previous = Sequencer::builder()
            .dimension("X", VarKind::Double, ValueRange::linear(0.0, 10.0, 10).unwrap())
            .build()
            .unwrap();
        let mut candidate = Candidate::new();
        candidate.insert(
            "X".into(),
            Neighborhood {
                center: Value::Float(7.0),
                lower: Value::Float(5.0),
                upper: Value::Float(10.0),
            },
        );
        let bounds = narrowed_bounds(&candidate, &previous, 1.0).unwrap();
        assert_eq!(bounds["X"], Bounds::new(5.0, 10.0, 10));
    }

    #[test]
    fn amplification_is_shared_between_distinct_dimensions() {
        let previous = Sequencer::builder()
            .dimension("a", VarKind::Double, ValueRange::linear(0.0, 1.0, 10).unwrap())
            .dimension("b", VarKind::Double, ValueRange::linear(0.0, 1.0, 5).unwrap())
            .dimension("c", VarKind::Double, ValueRange::linear(0.0, 1.0, 7).unwrap())
            .build()
            .unwrap();
        let hood = |lo: f64, hi: f64| Neighborhood {
            center: Value::Float(lo),
            lower: Value::Float(lo),
            upper: Value::Float(hi),
        };
        let mut candidate = Candidate::new();
        candidate.insert("a".into(), hood(0.1, 0.3));
        candidate.insert("b".into(), hood(0.2, 0.6));
        candidate.insert("c".into(), hood(0.5, 0.5));

        let bounds = narrowed_bounds(&candidate, &previous, 4.0).unwrap();
        assert_eq!(bounds["a"].count, 20);
        assert_eq!(bounds["b"].count, 10);
        assert_eq!(bounds["c"], Bounds::new(0.5, 0.5, 1));
    }

    #[test]
    fn text_dimension_cannot_be_narrowed() {
        let previous = Sequencer::new(Vec::new()).unwrap();
        let mut candidate = Candidate::new();
        candidate.insert(
            "s".into(),
            Neighborhood {
                center: Value::Text("a".into()),
                lower: Value::Text("a".into()),
                upper: Value::Text("b".into()),
            },
        );
        assert!(narrowed_bounds(&candidate, &previous, 1.0).is_err());
    }
}
