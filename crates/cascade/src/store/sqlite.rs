use crate::{
    error::{Error, Result},
    store::{NeighborBounds, ResultStore},
    value::{LEVEL_FIELD, Record, Schema, Value, VarKind, is_identifier},
};
use rusqlite::{
    Connection, OptionalExtension, Row, params, params_from_iter,
    types::{Value as SqlValue, ValueRef},
};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A [`ResultStore`] backed by one SQLite table.
///
/// Every field becomes a column of the SQL type given by
/// [`VarKind::sql_type`], plus an auto-increment `id` that fixes the native
/// order and the integer [`LEVEL_FIELD`] tag. Identifiers are always quoted
/// and values are always bound as parameters.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    table: String,
    schema: Option<Schema>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `table` is not a plain identifier
    /// and [`Error::Storage`] if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self> {
        check_table(table)?;
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn, table))
    }

    /// Private, throwaway database. Mostly useful for tests.
    pub fn open_in_memory(table: &str) -> Result<Self> {
        check_table(table)?;
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, table))
    }

    fn with_connection(conn: Connection, table: &str) -> Self {
        Self {
            conn,
            table: quote(table),
            schema: None,
        }
    }

    fn schema(&self) -> Result<&Schema> {
        self.schema
            .as_ref()
            .ok_or_else(|| Error::storage("table schema has not been set up"))
    }

    /// Column list in the order used by every `SELECT`.
    fn columns(&self) -> Result<Vec<(String, VarKind)>> {
        let mut columns: Vec<(String, VarKind)> = self
            .schema()?
            .iter()
            .map(|(n, k)| (n.to_string(), k))
            .collect();
        columns.push((LEVEL_FIELD.to_string(), VarKind::UInt32));
        Ok(columns)
    }

    fn select_list(columns: &[(String, VarKind)]) -> String {
        columns
            .iter()
            .map(|(n, _)| quote(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn table_exists(&self) -> Result<bool> {
        let name = self.table.trim_matches('"');
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(n != 0)
    }

    fn column_types(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", self.table))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn check_table(table: &str) -> Result<()> {
    if is_identifier(table) {
        Ok(())
    } else {
        Err(Error::config(format!(
            "table name '{table}' is not a valid identifier"
        )))
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Int(i) => SqlValue::Integer(*i),
        Value::UInt(u) => match i64::try_from(*u) {
            Ok(i) => SqlValue::Integer(i),
            Err(_) => SqlValue::Real(*u as f64),
        },
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn from_sql(kind: VarKind, value: ValueRef<'_>) -> Option<Value> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(match kind {
            VarKind::UInt64 | VarKind::UInt32 | VarKind::UInt8 => {
                Value::UInt(u64::try_from(i).unwrap_or(0))
            }
            VarKind::Float | VarKind::Double => Value::Float(i as f64),
            VarKind::Text => Value::Text(i.to_string()),
            VarKind::Int64 | VarKind::Int32 => Value::Int(i),
        }),
        ValueRef::Real(f) => Some(match kind {
            VarKind::Text => Value::Text(f.to_string()),
            _ => kind.cast(f),
        }),
        ValueRef::Text(bytes) => Some(Value::Text(String::from_utf8_lossy(bytes).into_owned())),
    }
}

fn read_record(row: &Row<'_>, columns: &[(String, VarKind)]) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (i, (name, kind)) in columns.iter().enumerate() {
        if let Some(v) = from_sql(*kind, row.get_ref(i)?) {
            record.insert(name.clone(), v);
        }
    }
    Ok(record)
}

/// `"a" = ?1 AND "b" = ?2 ...`, numbering from `first`.
fn equalities<'a>(names: impl Iterator<Item = &'a String>, first: usize) -> Vec<String> {
    names
        .enumerate()
        .map(|(i, n)| format!("{} = ?{}", quote(n), first + i))
        .collect()
}

impl ResultStore for SqliteStore {
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(table = %self.table)))]
    fn ensure_schema(&mut self, schema: &Schema) -> Result<()> {
        if self.table_exists()? {
            let existing = self.column_types()?;
            let wanted = schema
                .iter()
                .map(|(n, k)| (n, k.sql_type()))
                .chain(core::iter::once((LEVEL_FIELD, "INTEGER")));
            for (name, sql_type) in wanted {
                match existing.iter().find(|(n, _)| n == name) {
                    Some((_, t)) if t.eq_ignore_ascii_case(sql_type) => {}
                    Some((_, t)) => {
                        return Err(Error::config(format!(
                            "stored column '{name}' is {t}, expected {sql_type}"
                        )));
                    }
                    None => {
                        return Err(Error::config(format!(
                            "stored table has no column '{name}'"
                        )));
                    }
                }
            }
            #[cfg(feature = "tracing")]
            tracing::info!("Validated existing result table");
        } else {
            let mut columns = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
            columns.extend(
                schema
                    .iter()
                    .map(|(n, k)| format!("{} {}", quote(n), k.sql_type())),
            );
            columns.push(format!("{} INTEGER NOT NULL", quote(LEVEL_FIELD)));
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({});\
                 CREATE INDEX IF NOT EXISTS {} ON {} ({});",
                self.table,
                columns.join(", "),
                quote(&format!("{}_level", self.table.trim_matches('"'))),
                self.table,
                quote(LEVEL_FIELD),
            ))?;
            #[cfg(feature = "tracing")]
            tracing::info!("Created result table");
        }
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn record_count(&self, level: u32) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                self.table,
                quote(LEVEL_FIELD)
            ),
            params![level],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn exists(&self, fields: &Record) -> Result<bool> {
        let mut sql = format!("SELECT EXISTS(SELECT 1 FROM {}", self.table);
        if !fields.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&equalities(fields.keys(), 1).join(" AND "));
        }
        sql.push(')');
        let found: bool = self.conn.query_row(
            &sql,
            params_from_iter(fields.values().map(to_sql)),
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn insert(&mut self, record: &Record) -> Result<()> {
        let names: Vec<String> = record.keys().map(|n| quote(n)).collect();
        let slots: Vec<String> = (1..=record.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            names.join(", "),
            slots.join(", ")
        );
        self.conn
            .execute(&sql, params_from_iter(record.values().map(to_sql)))?;
        Ok(())
    }

    fn top_by_level(
        &self,
        level: u32,
        sort_field: &str,
        descending: bool,
        offset: u64,
    ) -> Result<Option<Record>> {
        let columns = self.columns()?;
        if !columns.iter().any(|(n, _)| n == sort_field) {
            return Err(Error::storage(format!("no column named '{sort_field}'")));
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 AND {} IS NOT NULL ORDER BY {} {}, id ASC LIMIT 1 OFFSET ?2",
            Self::select_list(&columns),
            self.table,
            quote(LEVEL_FIELD),
            quote(sort_field),
            quote(sort_field),
            if descending { "DESC" } else { "ASC" },
        );
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let record = self
            .conn
            .query_row(&sql, params![level, offset], |row| read_record(row, &columns))
            .optional()?;
        Ok(record)
    }

    fn neighbor_bounds(&self, level: u32, fixed: &Record, free: &str) -> Result<NeighborBounds> {
        let center = fixed
            .get(free)
            .ok_or_else(|| Error::storage(format!("no reference value for '{free}'")))?;
        let kind = self
            .schema()?
            .get(free)
            .ok_or_else(|| Error::storage(format!("no column named '{free}'")))?;

        let others: Vec<(&String, &Value)> = fixed.iter().filter(|(n, _)| *n != free).collect();
        let col = quote(free);

        // ?1 = center, ?2 = level, then one slot per fixed field.
        let mut filters = vec![format!("{} = ?2", quote(LEVEL_FIELD)), format!("{col} <> ?1")];
        filters.extend(equalities(others.iter().map(|(n, _)| *n), 3));
        let sql = format!(
            "SELECT CASE WHEN {col} < ?1 THEN -1 ELSE 1 END AS side, MAX({col}), MIN({col}) \
             FROM {} WHERE {} GROUP BY side",
            self.table,
            filters.join(" AND "),
        );

        let mut values = vec![to_sql(center), SqlValue::Integer(i64::from(level))];
        values.extend(others.iter().map(|(_, v)| to_sql(v)));

        let mut stmt = self.conn.prepare(&sql)?;
        let groups = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    from_sql(kind, row.get_ref(1)?),
                    from_sql(kind, row.get_ref(2)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if groups.len() > 2 {
            return Err(Error::storage(format!(
                "{} neighbor groups for '{free}'",
                groups.len()
            )));
        }

        let mut bounds = NeighborBounds::default();
        for (side, max, min) in groups {
            match side {
                -1 => bounds.lower = max,
                1 => bounds.upper = min,
                other => {
                    return Err(Error::storage(format!(
                        "unexpected neighbor group {other} for '{free}'"
                    )));
                }
            }
        }
        Ok(bounds)
    }
}
