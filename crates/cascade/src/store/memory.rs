use crate::{
    error::{Error, Result},
    store::{NeighborBounds, ResultStore},
    value::{LEVEL_FIELD, Record, Schema, Value},
};
use core::cmp::Ordering;

/// A [`ResultStore`] kept entirely in process memory.
///
/// Records are scanned linearly. Ties in [`ResultStore::top_by_level`] keep
/// insertion order. Intended for tests, dry runs and small sweeps.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    schema: Option<Schema>,
    records: Vec<Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn at_level(&self, level: u32) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(move |r| r.get(LEVEL_FIELD).and_then(Value::as_f64) == Some(f64::from(level)))
    }
}

fn same(a: &Value, b: &Value) -> bool {
    a == b || a.partial_cmp(b) == Some(Ordering::Equal)
}

fn matches(record: &Record, fields: &Record) -> bool {
    fields
        .iter()
        .all(|(name, v)| record.get(name).is_some_and(|r| same(r, v)))
}

impl ResultStore for MemoryStore {
    fn ensure_schema(&mut self, schema: &Schema) -> Result<()> {
        if let Some(existing) = &self.schema {
            for (name, kind) in schema.iter() {
                if let Some(current) = existing.get(name) {
                    if current != kind {
                        return Err(Error::config(format!(
                            "stored column '{name}' is {current}, expected {kind}"
                        )));
                    }
                }
            }
        }
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn record_count(&self, level: u32) -> Result<u64> {
        Ok(self.at_level(level).count() as u64)
    }

    fn exists(&self, fields: &Record) -> Result<bool> {
        Ok(self.records.iter().any(|r| matches(r, fields)))
    }

    fn insert(&mut self, record: &Record) -> Result<()> {
        if let Some(schema) = &self.schema {
            if let Some(name) = record
                .keys()
                .find(|name| *name != LEVEL_FIELD && !schema.contains(name))
            {
                return Err(Error::storage(format!("no column named '{name}'")));
            }
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn top_by_level(
        &self,
        level: u32,
        sort_field: &str,
        descending: bool,
        offset: u64,
    ) -> Result<Option<Record>> {
        let mut ranked: Vec<(&Record, &Value)> = self
            .at_level(level)
            .filter_map(|r| r.get(sort_field).map(|v| (r, v)))
            .collect();
        // Stable, so ties stay in insertion order.
        ranked.sort_by(|(_, a), (_, b)| {
            let ord = a.partial_cmp(b).unwrap_or(Ordering::Equal);
            if descending { ord.reverse() } else { ord }
        });
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(ranked.get(offset).map(|(r, _)| (*r).clone()))
    }

    fn neighbor_bounds(&self, level: u32, fixed: &Record, free: &str) -> Result<NeighborBounds> {
        let center = fixed
            .get(free)
            .ok_or_else(|| Error::storage(format!("no reference value for '{free}'")))?;

        let mut others = fixed.clone();
        others.remove(free);

        let mut bounds = NeighborBounds::default();
        for value in self
            .at_level(level)
            .filter(|r| matches(r, &others))
            .filter_map(|r| r.get(free))
        {
            match value.partial_cmp(center) {
                Some(Ordering::Less) => {
                    if bounds.lower.as_ref().is_none_or(|lo| value > lo) {
                        bounds.lower = Some(value.clone());
                    }
                }
                Some(Ordering::Greater) => {
                    if bounds.upper.as_ref().is_none_or(|hi| value < hi) {
                        bounds.upper = Some(value.clone());
                    }
                }
                _ => {}
            }
        }
        Ok(bounds)
    }
}
