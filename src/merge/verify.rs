//! Lockstep verification of shadow state against the database.
//!
//! The shadow cursor and the database cursor walk the same key order, so
//! verification is a straight zip: every row must match value for value, and
//! both sides must run out together. Conflict verification walks the
//! database's per-table conflict rows against the sorted shadow conflict
//! list the same way.

use std::cmp::Ordering;

use crate::cycle::Cycle;
use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::repo::table::Column;
use crate::repo::Table;
use crate::row::Row;

/// Compare the table's shadow store against the database, row by row.
pub fn verify_table(cycle: &mut Cycle, table: &Table) -> Result<()> {
    let order_by: Vec<String> = table
        .pk_cols
        .iter()
        .map(|c| format!("`{}`", c.name))
        .collect();
    let sql = format!(
        "SELECT * FROM `{}` ORDER BY {}",
        table.name,
        order_by.join(", ")
    );
    let db_rows = cycle
        .server_query_rows(&sql)
        .with_context(|| format!("reading table `{}` from database", table.name))?;

    let columns: Vec<&Column> = table.all_columns().collect();
    let mut cursor = table.data.cursor();
    let shadow_count = cursor.remaining();

    for (row_index, wire_row) in db_rows.iter().enumerate() {
        let Some(shadow_row) = cursor.next_row() else {
            return Err(FuzzerError::new(format!(
                "table `{}`: database has {} rows, shadow has {shadow_count}",
                table.name,
                db_rows.len()
            )));
        };
        compare_wire_row(&table.name, row_index, &columns, wire_row, &shadow_row)?;
    }
    if cursor.next_row().is_some() {
        return Err(FuzzerError::new(format!(
            "table `{}`: database has {} rows, shadow has {shadow_count}",
            table.name,
            db_rows.len()
        )));
    }
    Ok(())
}

/// Compare the database's conflict rows for `table` against the sorted
/// shadow conflict list.
pub fn verify_conflicts(cycle: &mut Cycle, table: &Table, conflicts: &[Row]) -> Result<()> {
    if conflicts.is_empty() {
        return verify_no_conflicts(cycle, table);
    }

    // Conflict columns: base | ours | theirs segments over the table's
    // columns, key columns first — the same layout as the shadow rows.
    let columns: Vec<&Column> = table.all_columns().collect();
    let mut select: Vec<String> = Vec::with_capacity(columns.len() * 3);
    for prefix in ["base_", "our_", "their_"] {
        for col in &columns {
            select.push(format!("`{prefix}{}`", col.name));
        }
    }
    let sql = format!(
        "SELECT {cols} FROM `dolt_conflicts_{table}` ORDER BY {cols}",
        cols = select.join(", "),
        table = table.name
    );
    let db_rows = cycle
        .server_query_rows(&sql)
        .with_context(|| format!("reading conflicts for `{}`", table.name))?;

    if db_rows.len() != conflicts.len() {
        return Err(FuzzerError::new(format!(
            "table `{}`: database reports {} conflicts, shadow merge produced {}",
            table.name,
            db_rows.len(),
            conflicts.len()
        )));
    }

    // The conflict row repeats the column list three times.
    let tripled: Vec<&Column> = columns
        .iter()
        .cycle()
        .take(columns.len() * 3)
        .copied()
        .collect();
    for (row_index, (wire_row, shadow_row)) in db_rows.iter().zip(conflicts).enumerate() {
        compare_wire_row(&table.name, row_index, &tripled, wire_row, shadow_row)
            .context("conflict row mismatch")?;
    }
    Ok(())
}

fn verify_no_conflicts(cycle: &mut Cycle, table: &Table) -> Result<()> {
    let rows = cycle
        .server_query_rows("SELECT `table` FROM dolt_conflicts")
        .context("reading conflict summary")?;
    for wire_row in rows {
        if let Some(mysql::Value::Bytes(name)) = wire_row.first() {
            if name.as_slice() == table.name.as_bytes() {
                return Err(FuzzerError::new(format!(
                    "table `{}`: database reports conflicts, shadow merge produced none",
                    table.name
                )));
            }
        }
    }
    Ok(())
}

fn compare_wire_row(
    table: &str,
    row_index: usize,
    columns: &[&Column],
    wire_row: &[mysql::Value],
    shadow_row: &Row,
) -> Result<()> {
    if wire_row.len() != columns.len() || shadow_row.values.len() != columns.len() {
        return Err(FuzzerError::new(format!(
            "table `{table}`: row {row_index} width mismatch \
             (database {}, shadow {}, schema {})",
            wire_row.len(),
            shadow_row.values.len(),
            columns.len()
        )));
    }
    for ((wire, col), shadow_value) in wire_row.iter().zip(columns).zip(&shadow_row.values) {
        let db_value = col
            .type_instance
            .from_wire(wire)
            .with_context(|| format!("table `{table}` row {row_index} column `{}`", col.name))?;
        if db_value.compare(shadow_value) != Ordering::Equal {
            return Err(FuzzerError::new(format!(
                "table `{table}`: row {row_index} column `{}` differs \
                 (database {db_value}, shadow {shadow_value})",
                col.name
            )));
        }
    }
    Ok(())
}
