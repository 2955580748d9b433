//! `internal_data/` export.
//!
//! When validation or merge verification finds a divergence, the shadow
//! model is dumped for inspection: one CSV per table, `conflicts.csv` when a
//! merge produced conflicts, and a `setup.sh` that rebuilds a repository
//! from the CSVs. The directory can optionally be zipped, and removed after
//! zipping.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::repo::table::Column;
use crate::repo::Table;
use crate::row::Row;
use crate::value::Value;

/// Name of the export directory inside a cycle directory.
pub const INTERNAL_DATA_DIR: &str = "internal_data";

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Dump `tables` (and optionally one table's merge conflicts) under
/// `cycle_dir/internal_data/`. Returns the directory or zip path written.
pub fn dump_internal_data(
    cycle_dir: &Path,
    tables: &[Table],
    conflicts: Option<(&Table, &[Row])>,
    zip_output: bool,
    delete_after_zip: bool,
) -> Result<PathBuf> {
    let dir = cycle_dir.join(INTERNAL_DATA_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    for table in tables {
        let path = dir.join(format!("{}.csv", table.name));
        table.data.export_to_csv(&path)?;
    }
    if let Some((table, rows)) = conflicts {
        write_conflicts_csv(&dir.join("conflicts.csv"), table, rows)?;
    }
    write_setup_script(&dir.join("setup.sh"), tables)?;

    if !zip_output {
        return Ok(dir);
    }
    let zip_path = cycle_dir.join("internal_data.zip");
    zip_directory(&dir, &zip_path)?;
    if delete_after_zip {
        fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
    }
    Ok(zip_path)
}

/// Conflict CSV: `base_`, `our_`, `their_` headers over key columns then
/// non-key columns, matching the conflict row layout.
fn write_conflicts_csv(path: &Path, table: &Table, rows: &[Row]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| FuzzerError::external(format!("creating {}", path.display()), e))?;
    let columns: Vec<&Column> = table.all_columns().collect();
    let mut headers = Vec::with_capacity(columns.len() * 3);
    for prefix in ["base_", "our_", "their_"] {
        for col in &columns {
            headers.push(format!("{prefix}{}", col.name));
        }
    }
    writer.write_record(&headers).map_err(FuzzerError::from)?;
    for row in rows {
        writer
            .write_record(row.values.iter().map(Value::csv_text))
            .map_err(FuzzerError::from)?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// A script that rebuilds the repository from the dumped CSVs.
fn write_setup_script(path: &Path, tables: &[Table]) -> Result<()> {
    let mut script = String::from("#!/bin/bash\nset -euo pipefail\n\ndolt init\ndolt sql <<'SQL'\n");
    for table in tables {
        script.push_str(&table.create_statement(&[]));
        script.push_str(";\n");
    }
    script.push_str("SQL\n");
    for table in tables {
        script.push_str(&format!(
            "dolt table import -u {} {}.csv\n",
            table.name, table.name
        ));
    }
    fs::write(path, script).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn zip_directory(dir: &Path, zip_path: &Path) -> Result<()> {
    let file =
        File::create(zip_path).with_context(|| format!("creating {}", zip_path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for entry in entries {
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FuzzerError::new("unnamed file in internal_data"))?;
        zip.start_file(format!("{INTERNAL_DATA_DIR}/{name}"), options)
            .map_err(|e| FuzzerError::external("adding zip entry", e))?;
        let mut src =
            File::open(&entry).with_context(|| format!("opening {}", entry.display()))?;
        io::copy(&mut src, &mut zip).context("writing zip entry")?;
    }
    zip.finish()
        .map_err(|e| FuzzerError::external("finishing zip", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::table::Column;
    use crate::types::TypeInstance;

    fn sample_table() -> Table {
        let mut t = Table::new(
            "t0",
            vec![Column::new("k", TypeInstance::BigInt)],
            vec![Column::new("v", TypeInstance::Int)],
            Vec::new(),
        );
        t.data.exec("INSERT INTO `t0` VALUES (1, 10)").unwrap();
        t.data.exec("INSERT INTO `t0` VALUES (2, 20)").unwrap();
        t
    }

    #[test]
    fn dump_writes_csv_and_setup_script() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();
        let out = dump_internal_data(dir.path(), &[table], None, false, false).unwrap();
        assert!(out.join("t0.csv").exists());
        let script = fs::read_to_string(out.join("setup.sh")).unwrap();
        assert!(script.contains("dolt init"));
        assert!(script.contains("CREATE TABLE `t0`"));
        assert!(script.contains("dolt table import -u t0 t0.csv"));
    }

    #[test]
    fn conflicts_csv_has_three_segment_headers() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();
        let conflict = Row::new(
            vec![
                Value::Int(1),
                Value::Int(10),
                Value::Int(1),
                Value::Int(11),
                Value::Null,
                Value::Null,
            ],
            0,
        );
        let conflicts = vec![conflict];
        let out =
            dump_internal_data(dir.path(), &[table.copy()], Some((&table, &conflicts)), false, false)
                .unwrap();
        let text = fs::read_to_string(out.join("conflicts.csv")).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, "base_k,base_v,our_k,our_v,their_k,their_v");
        assert!(text.lines().nth(1).unwrap().contains("\\N"));
    }

    #[test]
    fn zip_replaces_directory_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();
        let out = dump_internal_data(dir.path(), &[table], None, true, true).unwrap();
        assert!(out.ends_with("internal_data.zip"));
        assert!(out.exists());
        assert!(!dir.path().join(INTERNAL_DATA_DIR).exists());
    }
}
