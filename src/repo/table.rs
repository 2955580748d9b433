//! Tables, columns, indexes, and foreign keys.
//!
//! A [`Table`] couples its schema with the shadow row store holding its
//! contents. Indexes and foreign keys are structural descriptors only: they
//! shape the generated DDL and fire hooks, but the shadow store never
//! enforces them.

use crate::store::TableData;
use crate::types::TypeInstance;

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// A named, typed column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_instance: TypeInstance,
}

impl Column {
    pub fn new(name: impl Into<String>, type_instance: TypeInstance) -> Self {
        Self {
            name: name.into(),
            type_instance,
        }
    }
}

// ---------------------------------------------------------------------------
// Index / ForeignKey
// ---------------------------------------------------------------------------

/// A secondary index descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

impl Index {
    /// `CREATE INDEX` statement for this descriptor.
    #[must_use]
    pub fn create_statement(&self, table: &str) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| format!("`{c}`")).collect();
        format!(
            "CREATE INDEX `{}` ON `{table}` ({})",
            self.name,
            cols.join(",")
        )
    }
}

/// A foreign-key descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    /// Referencing table and columns.
    pub table: String,
    pub columns: Vec<String>,
    /// Referenced table and columns.
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

impl ForeignKey {
    /// The `CONSTRAINT ... FOREIGN KEY` fragment for a `CREATE TABLE`.
    #[must_use]
    pub fn table_fragment(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| format!("`{c}`")).collect();
        let refs: Vec<String> = self
            .referenced_columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect();
        format!(
            "CONSTRAINT `{}` FOREIGN KEY ({}) REFERENCES `{}` ({})",
            self.name,
            cols.join(","),
            self.referenced_table,
            refs.join(",")
        )
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A table: schema plus its shadow row store.
#[derive(Clone, Debug)]
pub struct Table {
    pub name: String,
    pub pk_cols: Vec<Column>,
    pub non_pk_cols: Vec<Column>,
    pub indexes: Vec<Index>,
    pub data: TableData,
}

impl Table {
    /// Build a table; the row store's column order is key columns first.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pk_cols: Vec<Column>,
        non_pk_cols: Vec<Column>,
        indexes: Vec<Index>,
    ) -> Self {
        let mut columns = pk_cols.clone();
        columns.extend(non_pk_cols.iter().cloned());
        let pk_len = pk_cols.len();
        Self {
            name: name.into(),
            pk_cols,
            non_pk_cols,
            indexes,
            data: TableData::new(columns, pk_len),
        }
    }

    /// All columns, key columns first.
    pub fn all_columns(&self) -> impl Iterator<Item = &Column> {
        self.pk_cols.iter().chain(self.non_pk_cols.iter())
    }

    /// Deep copy, row store included.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            pk_cols: self.pk_cols.clone(),
            non_pk_cols: self.non_pk_cols.clone(),
            indexes: self.indexes.clone(),
            data: self.data.copy(),
        }
    }

    /// `CREATE TABLE` DDL including inline indexes and any foreign keys that
    /// reference out of this table.
    #[must_use]
    pub fn create_statement(&self, foreign_keys: &[ForeignKey]) -> String {
        let mut parts: Vec<String> = Vec::new();
        for col in &self.pk_cols {
            parts.push(format!(
                "`{}` {} NOT NULL",
                col.name,
                col.type_instance.sql_name()
            ));
        }
        for col in &self.non_pk_cols {
            parts.push(format!("`{}` {}", col.name, col.type_instance.sql_name()));
        }
        if !self.pk_cols.is_empty() {
            let keys: Vec<String> = self.pk_cols.iter().map(|c| format!("`{}`", c.name)).collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(",")));
        }
        for idx in &self.indexes {
            let cols: Vec<String> = idx.columns.iter().map(|c| format!("`{c}`")).collect();
            parts.push(format!("INDEX `{}` ({})", idx.name, cols.join(",")));
        }
        for fk in foreign_keys {
            if fk.table == self.name {
                parts.push(fk.table_fragment());
            }
        }
        format!("CREATE TABLE `{}` ({})", self.name, parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeInstance;

    fn sample_table() -> Table {
        Table::new(
            "t0",
            vec![Column::new("pk", TypeInstance::BigInt)],
            vec![
                Column::new("c0", TypeInstance::Int),
                Column::new(
                    "c1",
                    TypeInstance::Varchar {
                        length: 8,
                        collation: "utf8mb4_0900_bin".to_owned(),
                    },
                ),
            ],
            vec![Index {
                name: "idx0".to_owned(),
                columns: vec!["c0".to_owned()],
            }],
        )
    }

    #[test]
    fn create_statement_shape() {
        let ddl = sample_table().create_statement(&[]);
        assert_eq!(
            ddl,
            "CREATE TABLE `t0` (`pk` BIGINT NOT NULL, `c0` INT, \
             `c1` VARCHAR(8) COLLATE utf8mb4_0900_bin, PRIMARY KEY (`pk`), \
             INDEX `idx0` (`c0`))"
        );
    }

    #[test]
    fn create_statement_includes_matching_foreign_keys() {
        let fk = ForeignKey {
            name: "fk0".to_owned(),
            table: "t0".to_owned(),
            columns: vec!["c0".to_owned()],
            referenced_table: "u".to_owned(),
            referenced_columns: vec!["pk".to_owned()],
        };
        let other = ForeignKey {
            name: "fk1".to_owned(),
            table: "elsewhere".to_owned(),
            columns: vec!["x".to_owned()],
            referenced_table: "u".to_owned(),
            referenced_columns: vec!["pk".to_owned()],
        };
        let ddl = sample_table().create_statement(&[fk, other]);
        assert!(ddl.contains("CONSTRAINT `fk0` FOREIGN KEY (`c0`) REFERENCES `u` (`pk`)"));
        assert!(!ddl.contains("fk1"));
    }

    #[test]
    fn create_statement_parses_back() {
        let table = sample_table();
        let ddl = table.create_statement(&[]);
        match crate::sqlparse::parse_statement(&ddl).unwrap() {
            crate::sqlparse::SqlStatement::CreateTable(ct) => {
                assert_eq!(ct.name, "t0");
                assert_eq!(ct.primary_key, vec!["pk".to_owned()]);
                assert_eq!(ct.columns.len(), 3);
            }
            other => panic!("expected create table, got {other:?}"),
        }
    }

    #[test]
    fn copy_does_not_alias_row_store() {
        let mut table = sample_table();
        table
            .data
            .exec("INSERT INTO `t0` VALUES (1, 2, 'x')")
            .unwrap();
        let copy = table.copy();
        table.data.exec("DELETE FROM `t0` WHERE `pk` = 1").unwrap();
        assert_eq!(copy.data.row_count(), 1);
        assert_eq!(table.data.row_count(), 0);
    }

    #[test]
    fn index_create_statement() {
        let idx = Index {
            name: "i".to_owned(),
            columns: vec!["a".to_owned(), "b".to_owned()],
        };
        assert_eq!(
            idx.create_statement("t"),
            "CREATE INDEX `i` ON `t` (`a`,`b`)"
        );
    }
}
