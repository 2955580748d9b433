//! Row-level three-way merge.
//!
//! Walks base, ours, and theirs in key order simultaneously. At each step the
//! smallest key drives one of nine cases keyed on the sign of ours↔base and
//! theirs↔base key comparisons; an exhausted cursor yields an empty row that
//! compares greater than any real row, which funnels the remaining rows
//! through the same nine cases.
//!
//! The merged table starts as a deep copy of ours and is transformed to
//! absorb theirs's non-conflicting changes. A row whose per-column merge
//! hits a conflicting column is abandoned at that column: the remaining
//! columns are not examined and one whole-row conflict is recorded.

use std::cmp::Ordering;

use crate::repo::Table;
use crate::row::Row;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// The result of merging one table.
#[derive(Clone, Debug)]
pub struct TableMerge {
    /// Deep-copy descendant of ours with theirs's changes applied.
    pub table: Table,
    /// Conflict rows, width `3 × columns`, sorted lexicographically.
    pub conflicts: Vec<Row>,
}

// ---------------------------------------------------------------------------
// Merge walk
// ---------------------------------------------------------------------------

/// Merge `theirs` into a deep copy of `ours` against their common `base`.
/// All three tables share a schema.
#[must_use]
pub fn merge_rows(base: &Table, ours: &Table, theirs: &Table) -> TableMerge {
    let mut merged = ours.copy();
    let mut conflicts: Vec<Row> = Vec::new();
    let width = base.pk_cols.len() + base.non_pk_cols.len();

    let mut base_cursor = base.data.cursor();
    let mut ours_cursor = ours.data.cursor();
    let mut theirs_cursor = theirs.data.cursor();
    let mut b = base_cursor.next_row();
    let mut o = ours_cursor.next_row();
    let mut t = theirs_cursor.next_row();

    while b.is_some() || o.is_some() || t.is_some() {
        let ours_base = key_cmp(o.as_ref(), b.as_ref());
        let theirs_base = key_cmp(t.as_ref(), b.as_ref());
        match (ours_base, theirs_base) {
            // Both sides are ahead of base: each introduces a new key.
            (Ordering::Less, Ordering::Less) => match key_cmp(o.as_ref(), t.as_ref()) {
                Ordering::Less => {
                    o = ours_cursor.next_row();
                }
                Ordering::Equal => {
                    let ours_row = o.as_ref().expect("Less than base implies present");
                    let theirs_row = t.as_ref().expect("Less than base implies present");
                    if !rows_equal(ours_row, theirs_row) {
                        conflicts.push(conflict_row(width, None, Some(ours_row), Some(theirs_row)));
                    }
                    o = ours_cursor.next_row();
                    t = theirs_cursor.next_row();
                }
                Ordering::Greater => {
                    let theirs_row = t.as_ref().expect("smaller side is present");
                    merged.data.put_row(theirs_row.clone());
                    t = theirs_cursor.next_row();
                }
            },
            // Ours introduced a new key; it is already in the merged copy.
            (Ordering::Less, Ordering::Equal) | (Ordering::Less, Ordering::Greater) => {
                o = ours_cursor.next_row();
            }
            // Theirs introduced a new key.
            (Ordering::Equal, Ordering::Less) | (Ordering::Greater, Ordering::Less) => {
                let theirs_row = t.as_ref().expect("Less than base implies present");
                merged.data.put_row(theirs_row.clone());
                t = theirs_cursor.next_row();
            }
            // All three touch the same key.
            (Ordering::Equal, Ordering::Equal) => {
                let base_row = b.as_ref().expect("Equal to base implies base present");
                let ours_row = o.as_ref().expect("Equal comparison implies present");
                let theirs_row = t.as_ref().expect("Equal comparison implies present");
                if rows_equal(ours_row, theirs_row) {
                    // Same result on both sides, nothing to do.
                } else if rows_equal(ours_row, base_row) {
                    // Only theirs changed.
                    merged.data.put_row(theirs_row.clone());
                } else if rows_equal(theirs_row, base_row) {
                    // Only ours changed; merged already holds it.
                } else {
                    match merge_columns(base_row, ours_row, theirs_row) {
                        Some(row) => merged.data.put_row(row),
                        None => conflicts.push(conflict_row(
                            width,
                            Some(base_row),
                            Some(ours_row),
                            Some(theirs_row),
                        )),
                    }
                }
                b = base_cursor.next_row();
                o = ours_cursor.next_row();
                t = theirs_cursor.next_row();
            }
            // Theirs deleted this key.
            (Ordering::Equal, Ordering::Greater) => {
                let base_row = b.as_ref().expect("Equal to base implies base present");
                let ours_row = o.as_ref().expect("Equal comparison implies present");
                if rows_equal(ours_row, base_row) {
                    merged.data.remove_by_key(base_row.key());
                } else {
                    conflicts.push(conflict_row(width, Some(base_row), Some(ours_row), None));
                }
                b = base_cursor.next_row();
                o = ours_cursor.next_row();
            }
            // Ours deleted this key.
            (Ordering::Greater, Ordering::Equal) => {
                let base_row = b.as_ref().expect("Equal to base implies base present");
                let theirs_row = t.as_ref().expect("Equal comparison implies present");
                if !rows_equal(theirs_row, base_row) {
                    conflicts.push(conflict_row(width, Some(base_row), None, Some(theirs_row)));
                }
                b = base_cursor.next_row();
                t = theirs_cursor.next_row();
            }
            // Deleted on both sides.
            (Ordering::Greater, Ordering::Greater) => {
                b = base_cursor.next_row();
            }
        }
    }

    conflicts.sort_by(Row::full_cmp);
    TableMerge {
        table: merged,
        conflicts,
    }
}

/// Key comparison where an exhausted cursor (`None`) is greater than any row.
fn key_cmp(a: Option<&Row>, b: Option<&Row>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.key_cmp(y),
    }
}

/// Whole-row equality through the value comparator.
fn rows_equal(a: &Row, b: &Row) -> bool {
    a.full_cmp(b) == Ordering::Equal
}

/// Per-column three-way merge. Returns `None` at the first conflicting
/// column; later columns are deliberately not examined.
fn merge_columns(base: &Row, ours: &Row, theirs: &Row) -> Option<Row> {
    let mut values = Vec::with_capacity(ours.values.len());
    for ((b, o), t) in base.values.iter().zip(&ours.values).zip(&theirs.values) {
        let value = if o.compare(t) == Ordering::Equal {
            o.clone()
        } else if o.compare(b) == Ordering::Equal {
            t.clone()
        } else if t.compare(b) == Ordering::Equal {
            o.clone()
        } else {
            return None;
        };
        values.push(value);
    }
    Some(Row::new(values, ours.pk_len))
}

/// Build a conflict row: base | ours | theirs segments, NULL-filled where a
/// side is absent.
fn conflict_row(width: usize, base: Option<&Row>, ours: Option<&Row>, theirs: Option<&Row>) -> Row {
    let mut values = Vec::with_capacity(width * 3);
    for side in [base, ours, theirs] {
        match side {
            Some(row) => values.extend(row.values.iter().cloned()),
            None => values.extend(std::iter::repeat(Value::Null).take(width)),
        }
    }
    Row::new(values, 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::table::Column;
    use crate::types::TypeInstance;

    fn table(name: &str, non_pk: usize, rows: &[&[i64]]) -> Table {
        let mut non_pk_cols = Vec::new();
        for i in 0..non_pk {
            non_pk_cols.push(Column::new(format!("c{i}"), TypeInstance::BigInt));
        }
        let mut t = Table::new(
            name,
            vec![Column::new("k", TypeInstance::BigInt)],
            non_pk_cols,
            Vec::new(),
        );
        for row in rows {
            let literals: Vec<String> = row.iter().map(ToString::to_string).collect();
            t.data
                .exec(&format!(
                    "INSERT INTO `{name}` VALUES ({})",
                    literals.join(", ")
                ))
                .unwrap();
        }
        t
    }

    fn keys(t: &Table) -> Vec<i64> {
        t.data
            .all_rows()
            .into_iter()
            .map(|r| match r.values[0] {
                Value::Int(v) => v,
                ref other => panic!("unexpected key {other:?}"),
            })
            .collect()
    }

    #[test]
    fn identical_inputs_merge_to_themselves() {
        let base = table("t", 1, &[&[1, 10], &[2, 20]]);
        let ours = table("t", 1, &[&[1, 10], &[2, 20]]);
        let theirs = table("t", 1, &[&[1, 10], &[2, 20]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert!(out.conflicts.is_empty());
        assert_eq!(keys(&out.table), vec![1, 2]);
    }

    #[test]
    fn both_update_same_row_differently_conflicts() {
        // Scenario: base (1,10),(2,20); ours 2→22; theirs 2→23.
        let base = table("t", 1, &[&[1, 10], &[2, 20]]);
        let ours = table("t", 1, &[&[1, 10], &[2, 22]]);
        let theirs = table("t", 1, &[&[1, 10], &[2, 23]]);
        let out = merge_rows(&base, &ours, &theirs);

        let rows = out.table.data.all_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values, vec![Value::Int(1), Value::Int(10)]);
        assert_eq!(rows[1].values, vec![Value::Int(2), Value::Int(22)]);

        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(
            out.conflicts[0].values,
            vec![
                Value::Int(2),
                Value::Int(20),
                Value::Int(2),
                Value::Int(22),
                Value::Int(2),
                Value::Int(23),
            ]
        );
    }

    #[test]
    fn per_column_merge_combines_disjoint_column_edits() {
        // Scenario: PK k, non-PK a,b,c. ours edits a, theirs edits b.
        let base = table("t", 3, &[&[1, 10, 20, 30]]);
        let ours = table("t", 3, &[&[1, 11, 20, 30]]);
        let theirs = table("t", 3, &[&[1, 10, 21, 30]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert!(out.conflicts.is_empty());
        let rows = out.table.data.all_rows();
        assert_eq!(
            rows[0].values,
            vec![Value::Int(1), Value::Int(11), Value::Int(21), Value::Int(30)]
        );
    }

    #[test]
    fn per_column_merge_conflicting_column_abandons_row() {
        // Both edit column a to different values; b edits would merge, but
        // the row is abandoned at the first conflicting column.
        let base = table("t", 2, &[&[1, 10, 20]]);
        let ours = table("t", 2, &[&[1, 11, 25]]);
        let theirs = table("t", 2, &[&[1, 12, 20]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert_eq!(out.conflicts.len(), 1);
        // Merged keeps ours' row untouched.
        assert_eq!(
            out.table.data.all_rows()[0].values,
            vec![Value::Int(1), Value::Int(11), Value::Int(25)]
        );
    }

    #[test]
    fn theirs_delete_of_unchanged_row_applies() {
        let base = table("t", 1, &[&[1, 10], &[2, 20]]);
        let ours = table("t", 1, &[&[1, 10], &[2, 20]]);
        let theirs = table("t", 1, &[&[2, 20]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert!(out.conflicts.is_empty());
        assert_eq!(keys(&out.table), vec![2]);
    }

    #[test]
    fn theirs_delete_of_changed_row_conflicts() {
        // Scenario: base (1,10); ours (1,11); theirs deletes 1.
        let base = table("t", 1, &[&[1, 10]]);
        let ours = table("t", 1, &[&[1, 11]]);
        let theirs = table("t", 1, &[]);
        let out = merge_rows(&base, &ours, &theirs);
        // Merged keeps ours' row (the conflict is recorded, not resolved).
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(
            out.conflicts[0].values,
            vec![
                Value::Int(1),
                Value::Int(10),
                Value::Int(1),
                Value::Int(11),
                Value::Null,
                Value::Null,
            ]
        );
    }

    #[test]
    fn ours_delete_of_changed_row_conflicts() {
        let base = table("t", 1, &[&[1, 10]]);
        let ours = table("t", 1, &[]);
        let theirs = table("t", 1, &[&[1, 12]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(
            out.conflicts[0].values,
            vec![
                Value::Int(1),
                Value::Int(10),
                Value::Null,
                Value::Null,
                Value::Int(1),
                Value::Int(12),
            ]
        );
        assert!(keys(&out.table).is_empty());
    }

    #[test]
    fn deletes_on_both_sides_agree() {
        let base = table("t", 1, &[&[1, 10], &[2, 20]]);
        let ours = table("t", 1, &[&[2, 20]]);
        let theirs = table("t", 1, &[&[2, 20]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert!(out.conflicts.is_empty());
        assert_eq!(keys(&out.table), vec![2]);
    }

    #[test]
    fn identical_adds_are_not_conflicts() {
        let base = table("t", 1, &[]);
        let ours = table("t", 1, &[&[5, 50]]);
        let theirs = table("t", 1, &[&[5, 50]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert!(out.conflicts.is_empty());
        assert_eq!(keys(&out.table), vec![5]);
    }

    #[test]
    fn divergent_adds_of_same_key_conflict_with_null_base() {
        let base = table("t", 1, &[]);
        let ours = table("t", 1, &[&[5, 50]]);
        let theirs = table("t", 1, &[&[5, 51]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(
            out.conflicts[0].values,
            vec![
                Value::Null,
                Value::Null,
                Value::Int(5),
                Value::Int(50),
                Value::Int(5),
                Value::Int(51),
            ]
        );
    }

    #[test]
    fn disjoint_adds_both_land() {
        let base = table("t", 1, &[&[3, 30]]);
        let ours = table("t", 1, &[&[1, 10], &[3, 30]]);
        let theirs = table("t", 1, &[&[3, 30], &[7, 70]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert!(out.conflicts.is_empty());
        assert_eq!(keys(&out.table), vec![1, 3, 7]);
    }

    #[test]
    fn trailing_theirs_rows_funnel_through_exhausted_cursors() {
        let base = table("t", 1, &[]);
        let ours = table("t", 1, &[]);
        let theirs = table("t", 1, &[&[1, 10], &[2, 20], &[3, 30]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert!(out.conflicts.is_empty());
        assert_eq!(keys(&out.table), vec![1, 2, 3]);
    }

    #[test]
    fn conflicts_are_sorted_by_all_columns() {
        let base = table("t", 1, &[&[1, 10], &[2, 20], &[3, 30]]);
        let ours = table("t", 1, &[&[1, 11], &[2, 21], &[3, 31]]);
        let theirs = table("t", 1, &[&[1, 12], &[2, 22], &[3, 32]]);
        let out = merge_rows(&base, &ours, &theirs);
        assert_eq!(out.conflicts.len(), 3);
        for pair in out.conflicts.windows(2) {
            assert_ne!(pair[0].full_cmp(&pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn merged_table_does_not_alias_ours() {
        let base = table("t", 1, &[&[1, 10]]);
        let mut ours = table("t", 1, &[&[1, 10]]);
        let theirs = table("t", 1, &[&[1, 10], &[2, 20]]);
        let out = merge_rows(&base, &ours, &theirs);
        ours.data.exec("DELETE FROM `t` WHERE `k` = 1").unwrap();
        assert_eq!(keys(&out.table), vec![1, 2]);
        assert_eq!(ours.data.row_count(), 0);
    }
}
