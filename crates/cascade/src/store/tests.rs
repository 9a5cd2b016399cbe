use crate::{
    Error, LEVEL_FIELD, MemoryStore, NeighborBounds, Record, ResultStore, Schema, Value, VarKind,
};

fn schema() -> Schema {
    Schema::from_fields([
        ("X", VarKind::Double),
        ("n", VarKind::UInt32),
        ("E", VarKind::Double),
    ])
    .unwrap()
}

fn record(x: f64, n: u64, e: f64, level: u32) -> Record {
    let mut r = Record::new();
    r.insert("X".into(), Value::Float(x));
    r.insert("n".into(), Value::UInt(n));
    r.insert("E".into(), Value::Float(e));
    r.insert(LEVEL_FIELD.into(), Value::UInt(u64::from(level)));
    r
}

fn fields(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn seeded<S: ResultStore>(mut store: S) -> S {
    store.ensure_schema(&schema()).unwrap();
    for (x, e) in [(0.0, 1.0), (5.0, 4.0), (7.0, 9.0), (10.0, 2.0)] {
        store.insert(&record(x, 1, e, 1)).unwrap();
    }
    store.insert(&record(6.0, 1, 20.0, 2)).unwrap();
    store.insert(&record(5.0, 2, 3.0, 1)).unwrap();
    store
}

fn run_inserted_record_exists<S: ResultStore>(store: S) {
    let store = seeded(store);
    assert!(
        store
            .exists(&fields(&[("X", Value::Float(7.0)), ("n", Value::UInt(1))]))
            .unwrap()
    );
    assert!(
        !store
            .exists(&fields(&[("X", Value::Float(7.5)), ("n", Value::UInt(1))]))
            .unwrap()
    );
    assert!(store.exists(&Record::new()).unwrap());
}

fn run_counts_per_level<S: ResultStore>(store: S) {
    let store = seeded(store);
    assert_eq!(store.record_count(1).unwrap(), 5);
    assert_eq!(store.record_count(2).unwrap(), 1);
    assert_eq!(store.record_count(3).unwrap(), 0);
}

fn run_top_by_level_ranks_within_level<S: ResultStore>(store: S) {
    let store = seeded(store);
    let best = store.top_by_level(1, "E", true, 0).unwrap().unwrap();
    assert_eq!(best["X"], Value::Float(7.0));
    assert_eq!(best[LEVEL_FIELD], Value::UInt(1));

    let second = store.top_by_level(1, "E", true, 1).unwrap().unwrap();
    assert_eq!(second["X"], Value::Float(5.0));
    assert_eq!(second["n"], Value::UInt(1));

    let worst = store.top_by_level(1, "E", false, 0).unwrap().unwrap();
    assert_eq!(worst["E"], Value::Float(1.0));

    assert_eq!(store.top_by_level(1, "E", true, 5).unwrap(), None);
    assert_eq!(store.top_by_level(4, "E", true, 0).unwrap(), None);
}

fn run_neighbor_bounds_fix_other_fields<S: ResultStore>(store: S) {
    let store = seeded(store);
    let center = fields(&[("X", Value::Float(7.0)), ("n", Value::UInt(1))]);
    assert_eq!(
        store.neighbor_bounds(1, &center, "X").unwrap(),
        NeighborBounds {
            lower: Some(Value::Float(5.0)),
            upper: Some(Value::Float(10.0)),
        }
    );

    // The level 2 record at X=6 is invisible from level 1.
    let edge = fields(&[("X", Value::Float(10.0)), ("n", Value::UInt(1))]);
    assert_eq!(
        store.neighbor_bounds(1, &edge, "X").unwrap(),
        NeighborBounds {
            lower: Some(Value::Float(7.0)),
            upper: None,
        }
    );

    // Only one record has n = 2.
    let lonely = fields(&[("X", Value::Float(5.0)), ("n", Value::UInt(2))]);
    assert_eq!(
        store.neighbor_bounds(1, &lonely, "X").unwrap(),
        NeighborBounds::default()
    );

    let along_n = fields(&[("X", Value::Float(5.0)), ("n", Value::UInt(1))]);
    assert_eq!(
        store.neighbor_bounds(1, &along_n, "n").unwrap(),
        NeighborBounds {
            lower: None,
            upper: Some(Value::UInt(2)),
        }
    );
}

fn run_neighbor_bounds_needs_reference<S: ResultStore>(store: S) {
    let store = seeded(store);
    let center = fields(&[("n", Value::UInt(1))]);
    assert!(matches!(
        store.neighbor_bounds(1, &center, "X"),
        Err(Error::Storage { .. })
    ));
}

fn run_incompatible_schema_is_rejected<S: ResultStore>(mut store: S) {
    store.ensure_schema(&schema()).unwrap();
    store.ensure_schema(&schema()).unwrap();
    let clash = Schema::from_fields([("X", VarKind::Text)]).unwrap();
    assert!(matches!(
        store.ensure_schema(&clash),
        Err(Error::Configuration { .. })
    ));
}

#[test]
fn memory_inserted_record_exists() {
    run_inserted_record_exists(MemoryStore::new());
}

#[test]
fn memory_counts_per_level() {
    run_counts_per_level(MemoryStore::new());
}

#[test]
fn memory_top_by_level_ranks_within_level() {
    run_top_by_level_ranks_within_level(MemoryStore::new());
}

#[test]
fn memory_neighbor_bounds_fix_other_fields() {
    run_neighbor_bounds_fix_other_fields(MemoryStore::new());
}

#[test]
fn memory_neighbor_bounds_needs_reference() {
    run_neighbor_bounds_needs_reference(MemoryStore::new());
}

#[test]
fn memory_incompatible_schema_is_rejected() {
    run_incompatible_schema_is_rejected(MemoryStore::new());
}

#[test]
fn memory_ties_keep_insertion_order() {
    let mut store = MemoryStore::new();
    store.ensure_schema(&schema()).unwrap();
    store.insert(&record(1.0, 1, 5.0, 1)).unwrap();
    store.insert(&record(2.0, 1, 5.0, 1)).unwrap();
    let first = store.top_by_level(1, "E", true, 0).unwrap().unwrap();
    assert_eq!(first["X"], Value::Float(1.0));
}

#[test]
fn memory_rejects_unknown_columns() {
    let mut store = MemoryStore::new();
    store.ensure_schema(&schema()).unwrap();
    let mut r = record(1.0, 1, 5.0, 1);
    r.insert("bogus".into(), Value::Int(1));
    assert!(matches!(store.insert(&r), Err(Error::Storage { .. })));
    assert!(store.is_empty());
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use crate::SqliteStore;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory("results").unwrap()
    }

    #[test]
    fn sqlite_inserted_record_exists() {
        run_inserted_record_exists(store());
    }

    #[test]
    fn sqlite_counts_per_level() {
        run_counts_per_level(store());
    }

    #[test]
    fn sqlite_top_by_level_ranks_within_level() {
        run_top_by_level_ranks_within_level(store());
    }

    #[test]
    fn sqlite_neighbor_bounds_fix_other_fields() {
        run_neighbor_bounds_fix_other_fields(store());
    }

    #[test]
    fn sqlite_neighbor_bounds_needs_reference() {
        run_neighbor_bounds_needs_reference(store());
    }

    #[test]
    fn sqlite_incompatible_schema_is_rejected() {
        run_incompatible_schema_is_rejected(store());
    }

    #[test]
    fn sqlite_rejects_bad_table_name() {
        assert!(matches!(
            SqliteStore::open_in_memory("results; DROP TABLE x"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn sqlite_table_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        {
            let mut store = SqliteStore::open(&path, "sweep").unwrap();
            store.ensure_schema(&schema()).unwrap();
            store.insert(&record(3.0, 4, 1.5, 1)).unwrap();
        }
        let mut store = SqliteStore::open(&path, "sweep").unwrap();
        store.ensure_schema(&schema()).unwrap();
        assert_eq!(store.record_count(1).unwrap(), 1);
        assert!(
            store
                .exists(&fields(&[("X", Value::Float(3.0)), ("n", Value::UInt(4))]))
                .unwrap()
        );

        let mut reopened = SqliteStore::open(&path, "sweep").unwrap();
        let clash = Schema::from_fields([("X", VarKind::Int64)]).unwrap();
        assert!(matches!(
            reopened.ensure_schema(&clash),
            Err(Error::Configuration { .. })
        ));
    }
}
