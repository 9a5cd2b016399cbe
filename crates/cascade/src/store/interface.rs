use crate::{
    error::Result,
    value::{Record, Schema, Value},
};
use alloc::boxed::Box;

/// Closest values around a point along one dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborBounds {
    /// Nearest strictly smaller value, if any.
    pub lower: Option<Value>,
    /// Nearest strictly larger value, if any.
    pub upper: Option<Value>,
}

/// Persistent storage for flat result records.
///
/// Every stored record carries the input fields, the output fields and the
/// [`LEVEL_FIELD`](crate::LEVEL_FIELD) tag. The scheduler only ever needs
/// the handful of queries below; implementations are free to index however
/// they like.
///
/// Implementations must never block indefinitely. Errors are reported as
/// [`Error::Storage`](crate::Error::Storage) and are not retried.
pub trait ResultStore {
    /// Creates the backing table for `schema`, or checks that an existing
    /// one is compatible.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`](crate::Error::Configuration) when an
    /// existing column has an incompatible type.
    fn ensure_schema(&mut self, schema: &Schema) -> Result<()>;

    /// Number of records tagged with `level`.
    fn record_count(&self, level: u32) -> Result<u64>;

    /// Whether a record matches every field of `fields`.
    fn exists(&self, fields: &Record) -> Result<bool>;

    fn insert(&mut self, record: &Record) -> Result<()>;

    /// The record at position `offset` among those tagged with `level`,
    /// ordered by `sort_field`.
    ///
    /// Ties keep the store's native order.
    fn top_by_level(
        &self,
        level: u32,
        sort_field: &str,
        descending: bool,
        offset: u64,
    ) -> Result<Option<Record>>;

    /// Nearest values of `free` strictly below and above `fixed[free]`,
    /// among records tagged with `level` that match every other field of
    /// `fixed`.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`](crate::Error::Storage) when the data is
    /// inconsistent, e.g. `fixed` lacks `free`.
    fn neighbor_bounds(&self, level: u32, fixed: &Record, free: &str) -> Result<NeighborBounds>;
}

impl<S: ResultStore + ?Sized> ResultStore for Box<S> {
    fn ensure_schema(&mut self, schema: &Schema) -> Result<()> {
        (**self).ensure_schema(schema)
    }

    fn record_count(&self, level: u32) -> Result<u64> {
        (**self).record_count(level)
    }

    fn exists(&self, fields: &Record) -> Result<bool> {
        (**self).exists(fields)
    }

    fn insert(&mut self, record: &Record) -> Result<()> {
        (**self).insert(record)
    }

    fn top_by_level(
        &self,
        level: u32,
        sort_field: &str,
        descending: bool,
        offset: u64,
    ) -> Result<Option<Record>> {
        (**self).top_by_level(level, sort_field, descending, offset)
    }

    fn neighbor_bounds(&self, level: u32, fixed: &Record, free: &str) -> Result<NeighborBounds> {
        (**self).neighbor_bounds(level, fixed, free)
    }
}
