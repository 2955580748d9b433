//! Shadow row store.
//!
//! The in-memory oracle for one table: an ordered map from primary-key tuple
//! to row, iterated in ascending key order. Statements produced by the
//! generators are applied through [`TableData::exec`] using the embedded
//! statement flavor, so the store and the database under test consume the
//! same SQL.
//!
//! Cursors are snapshots: they stay valid across later store mutations for
//! their phase-scoped lifetime. `close` releases the backing map and is
//! idempotent; a closed store rejects further statements.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::repo::table::Column;
use crate::rng::RandomSource;
use crate::row::{Row, RowKey};
use crate::sqlparse::{parse_statement, Literal, SqlStatement};
use crate::value::Value;

// ---------------------------------------------------------------------------
// TableData
// ---------------------------------------------------------------------------

/// Ordered shadow store for one table.
#[derive(Clone, Debug)]
pub struct TableData {
    columns: Vec<Column>,
    pk_len: usize,
    rows: BTreeMap<RowKey, Row>,
    closed: bool,
}

impl TableData {
    /// Create an empty store. `columns` lists primary-key columns first;
    /// `pk_len` is how many lead the key.
    #[must_use]
    pub fn new(columns: Vec<Column>, pk_len: usize) -> Self {
        debug_assert!(pk_len <= columns.len());
        Self {
            columns,
            pk_len,
            rows: BTreeMap::new(),
            closed: false,
        }
    }

    /// Column schema, key columns first.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of leading key columns.
    #[must_use]
    pub fn pk_len(&self) -> usize {
        self.pk_len
    }

    /// Apply one embedded-flavor statement.
    pub fn exec(&mut self, sql: &str) -> Result<()> {
        self.check_open()?;
        match parse_statement(sql).with_context(|| format!("parsing statement {sql:?}"))? {
            SqlStatement::Insert {
                values, replace, ..
            } => {
                let row = self.row_from_literals(&values)?;
                if replace {
                    self.rows.insert(row.row_key(), row);
                    Ok(())
                } else if self.contains_key(row.key()) {
                    Err(FuzzerError::new(format!(
                        "duplicate primary key in INSERT: {sql:?}"
                    )))
                } else {
                    self.rows.insert(row.row_key(), row);
                    Ok(())
                }
            }
            SqlStatement::Update {
                assignments,
                filter,
                ..
            } => {
                let key = self.key_from_filter(&filter)?;
                let Some(mut row) = self.rows.get(&key).cloned() else {
                    return Ok(()); // no matching row: SQL no-op
                };
                for (col, lit) in &assignments {
                    let idx = self.column_index(col)?;
                    if idx < self.pk_len {
                        return Err(FuzzerError::new(format!(
                            "UPDATE assigns primary-key column `{col}`"
                        )));
                    }
                    row.values[idx] = self.columns[idx].type_instance.parse_literal(lit)?;
                }
                self.rows.insert(key, row);
                Ok(())
            }
            SqlStatement::Delete { filter, .. } => {
                let key = self.key_from_filter(&filter)?;
                self.rows.remove(&key);
                Ok(())
            }
            SqlStatement::CreateTable(_) => Err(FuzzerError::new(
                "CREATE TABLE cannot be applied to an existing store",
            )),
        }
    }

    /// Insert or replace a row directly. The merge engine writes resolved
    /// rows through this rather than synthesizing SQL.
    pub fn put_row(&mut self, row: Row) {
        self.rows.insert(row.row_key(), row);
    }

    /// Remove a row by key directly. Missing keys are a no-op.
    pub fn remove_by_key(&mut self, key: &[Value]) {
        self.rows.remove(&RowKey(key.to_vec()));
    }

    /// Whether a row with this key exists.
    #[must_use]
    pub fn contains_key(&self, key: &[Value]) -> bool {
        self.rows.contains_key(&RowKey(key.to_vec()))
    }

    /// Fetch a row by key.
    #[must_use]
    pub fn get_row(&self, key: &[Value]) -> Option<&Row> {
        self.rows.get(&RowKey(key.to_vec()))
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    /// A uniformly chosen row, or `None` when empty.
    #[must_use]
    pub fn random_row(&self, rng: &RandomSource) -> Option<Row> {
        if self.rows.is_empty() {
            return None;
        }
        let offset = rng.u64_below(self.rows.len() as u64) as usize;
        self.rows.values().nth(offset).cloned()
    }

    /// All rows in ascending key order.
    #[must_use]
    pub fn all_rows(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    /// An ordered snapshot cursor.
    #[must_use]
    pub fn cursor(&self) -> RowCursor {
        RowCursor {
            rows: self.all_rows().into_iter(),
        }
    }

    /// Deep copy, contents included.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Write the store as CSV with a header row of column names.
    pub fn export_to_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| FuzzerError::external(format!("creating {}", path.display()), e))?;
        writer
            .write_record(self.columns.iter().map(|c| c.name.as_str()))
            .map_err(FuzzerError::from)?;
        for row in self.rows.values() {
            writer
                .write_record(row.values.iter().map(Value::csv_text))
                .map_err(FuzzerError::from)?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing {}", path.display()))?;
        Ok(())
    }

    /// Load rows from a CSV written by [`TableData::export_to_csv`].
    pub fn import_from_csv(&mut self, path: &Path) -> Result<()> {
        self.check_open()?;
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| FuzzerError::external(format!("opening {}", path.display()), e))?;
        for record in reader.records() {
            let record = record.map_err(FuzzerError::from)?;
            if record.len() != self.columns.len() {
                return Err(FuzzerError::new(format!(
                    "CSV width {} does not match schema width {}",
                    record.len(),
                    self.columns.len()
                )));
            }
            let mut values = Vec::with_capacity(self.columns.len());
            for (field, col) in record.iter().zip(&self.columns) {
                values.push(col.type_instance.parse_csv(field)?);
            }
            let row = Row::new(values, self.pk_len);
            self.rows.insert(row.row_key(), row);
        }
        Ok(())
    }

    /// Release the backing map. Idempotent.
    pub fn close(&mut self) {
        self.rows = BTreeMap::new();
        self.closed = true;
    }

    /// Whether `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(FuzzerError::new("store is closed"))
        } else {
            Ok(())
        }
    }

    fn row_from_literals(&self, literals: &[Literal]) -> Result<Row> {
        if literals.len() != self.columns.len() {
            return Err(FuzzerError::new(format!(
                "statement has {} values for {} columns",
                literals.len(),
                self.columns.len()
            )));
        }
        let mut values = Vec::with_capacity(literals.len());
        for (lit, col) in literals.iter().zip(&self.columns) {
            values.push(
                col.type_instance
                    .parse_literal(lit)
                    .with_context(|| format!("column `{}`", col.name))?,
            );
        }
        Ok(Row::new(values, self.pk_len))
    }

    fn key_from_filter(&self, filter: &[(String, Literal)]) -> Result<RowKey> {
        if filter.len() != self.pk_len {
            return Err(FuzzerError::new(format!(
                "filter names {} columns, primary key has {}",
                filter.len(),
                self.pk_len
            )));
        }
        let mut key = vec![Value::Null; self.pk_len];
        for (col, lit) in filter {
            let idx = self.column_index(col)?;
            if idx >= self.pk_len {
                return Err(FuzzerError::new(format!(
                    "filter column `{col}` is not part of the primary key"
                )));
            }
            key[idx] = self.columns[idx].type_instance.parse_literal(lit)?;
        }
        Ok(RowKey(key))
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| FuzzerError::new(format!("unknown column `{name}`")))
    }
}

// ---------------------------------------------------------------------------
// RowCursor
// ---------------------------------------------------------------------------

/// Snapshot cursor in ascending key order.
#[derive(Debug)]
pub struct RowCursor {
    rows: std::vec::IntoIter<Row>,
}

impl RowCursor {
    /// The next row, or `None` when exhausted.
    pub fn next_row(&mut self) -> Option<Row> {
        self.rows.next()
    }

    /// Rows remaining.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeInstance;

    fn test_store() -> TableData {
        TableData::new(
            vec![
                Column::new("pk", TypeInstance::BigInt),
                Column::new("c0", TypeInstance::Int),
                Column::new(
                    "c1",
                    TypeInstance::Varchar {
                        length: 16,
                        collation: "utf8mb4_0900_bin".to_owned(),
                    },
                ),
            ],
            1,
        )
    }

    #[test]
    fn insert_then_read_back() {
        let mut store = test_store();
        store
            .exec("INSERT INTO `t` VALUES (1, 10, 'a')")
            .unwrap();
        assert_eq!(store.row_count(), 1);
        let row = store.get_row(&[Value::Int(1)]).unwrap();
        assert_eq!(row.values[1], Value::Int(10));
    }

    #[test]
    fn insert_duplicate_key_errors() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 10, 'a')").unwrap();
        let err = store
            .exec("INSERT INTO `t` VALUES (1, 11, 'b')")
            .unwrap_err();
        assert!(format!("{err}").contains("duplicate primary key"));
    }

    #[test]
    fn replace_overwrites() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 10, 'a')").unwrap();
        store.exec("REPLACE INTO `t` VALUES (1, 11, 'b')").unwrap();
        assert_eq!(store.row_count(), 1);
        let row = store.get_row(&[Value::Int(1)]).unwrap();
        assert_eq!(row.values[1], Value::Int(11));
        assert_eq!(row.values[2], Value::Text("b".to_owned()));
    }

    #[test]
    fn update_changes_only_named_columns() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 10, 'a')").unwrap();
        store
            .exec("UPDATE `t` SET `c0` = 99 WHERE `pk` = 1")
            .unwrap();
        let row = store.get_row(&[Value::Int(1)]).unwrap();
        assert_eq!(row.values[1], Value::Int(99));
        assert_eq!(row.values[2], Value::Text("a".to_owned()));
    }

    #[test]
    fn update_missing_row_is_noop() {
        let mut store = test_store();
        store
            .exec("UPDATE `t` SET `c0` = 99 WHERE `pk` = 7")
            .unwrap();
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn update_rejects_primary_key_assignment() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 10, 'a')").unwrap();
        let err = store
            .exec("UPDATE `t` SET `pk` = 2 WHERE `pk` = 1")
            .unwrap_err();
        assert!(format!("{err}").contains("primary-key column"));
    }

    #[test]
    fn delete_removes_by_key() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 10, 'a')").unwrap();
        store.exec("INSERT INTO `t` VALUES (2, 20, 'b')").unwrap();
        store.exec("DELETE FROM `t` WHERE `pk` = 1").unwrap();
        assert_eq!(store.row_count(), 1);
        assert!(!store.contains_key(&[Value::Int(1)]));
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (5, 0, '')").unwrap();
        store.exec("INSERT INTO `t` VALUES (-3, 0, '')").unwrap();
        store.exec("INSERT INTO `t` VALUES (1, 0, '')").unwrap();
        let keys: Vec<Value> = store
            .all_rows()
            .into_iter()
            .map(|r| r.values[0].clone())
            .collect();
        assert_eq!(keys, vec![Value::Int(-3), Value::Int(1), Value::Int(5)]);
    }

    #[test]
    fn cursor_is_a_snapshot() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 0, '')").unwrap();
        store.exec("INSERT INTO `t` VALUES (2, 0, '')").unwrap();
        let mut cursor = store.cursor();
        store.exec("DELETE FROM `t` WHERE `pk` = 2").unwrap();
        assert_eq!(cursor.next_row().unwrap().values[0], Value::Int(1));
        assert_eq!(cursor.next_row().unwrap().values[0], Value::Int(2));
        assert!(cursor.next_row().is_none());
    }

    #[test]
    fn random_row_is_uniformish() {
        let rng = RandomSource::from_seed([21; 32]);
        let mut store = test_store();
        for i in 0..4 {
            store
                .exec(&format!("INSERT INTO `t` VALUES ({i}, 0, '')"))
                .unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let row = store.random_row(&rng).unwrap();
            seen.insert(format!("{:?}", row.values[0]));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn random_row_on_empty_is_none() {
        let rng = RandomSource::from_seed([22; 32]);
        let store = test_store();
        assert!(store.random_row(&rng).is_none());
    }

    #[test]
    fn deep_copy_does_not_alias() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 10, 'a')").unwrap();
        let copy = store.copy();
        store.exec("DELETE FROM `t` WHERE `pk` = 1").unwrap();
        assert_eq!(copy.row_count(), 1);
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn close_is_idempotent_and_blocks_exec() {
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 0, '')").unwrap();
        store.close();
        store.close();
        assert!(store.is_closed());
        assert!(store.exec("INSERT INTO `t` VALUES (2, 0, '')").is_err());
    }

    #[test]
    fn csv_round_trip_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let mut store = test_store();
        store.exec("INSERT INTO `t` VALUES (1, 10, 'ab')").unwrap();
        store.exec("INSERT INTO `t` VALUES (2, NULL, '')").unwrap();
        store.export_to_csv(&path).unwrap();

        let mut fresh = test_store();
        fresh.import_from_csv(&path).unwrap();
        assert_eq!(fresh.all_rows(), store.all_rows());
    }

    #[test]
    fn filter_must_cover_full_key() {
        let mut store = TableData::new(
            vec![
                Column::new("p", TypeInstance::Int),
                Column::new("q", TypeInstance::Int),
                Column::new("v", TypeInstance::Int),
            ],
            2,
        );
        store.exec("INSERT INTO `t` VALUES (1, 2, 3)").unwrap();
        let err = store.exec("DELETE FROM `t` WHERE `p` = 1").unwrap_err();
        assert!(format!("{err}").contains("primary key has 2"));
        store
            .exec("DELETE FROM `t` WHERE `p` = 1 AND `q` = 2")
            .unwrap();
        assert_eq!(store.row_count(), 0);
    }
}
