//! Replay-format tests: log lines round-trip through the parser, and the
//! shadow model rebuilt from a log matches the state the log describes,
//! stopping at the first error line.

use fuzzer::logging::{parse_line, LogType};
use fuzzer::replay::rebuild_shadow;
use fuzzer::value::Value;

const CREATE: &str =
    "SQLS: CREATE TABLE `t0` (`pk` BIGINT NOT NULL, `c0` INT, PRIMARY KEY (`pk`))";

#[test]
fn full_log_parses_line_by_line() {
    let log = [
        "CLI:  dolt init",
        "CLI:  dolt log -n 1",
        CREATE,
        "SQLQ: INSERT INTO `t0` VALUES (1, 10)",
        "SQLB: INSERT INTO `t0` VALUES (2, 20)",
        "WARN: something odd",
        "INFO: Cycle finished successfully",
    ];
    for line in log {
        parse_line(line).unwrap();
    }
}

#[test]
fn rebuild_applies_all_sql_flavors() {
    let log = format!(
        "{CREATE}\n\
         SQLQ: INSERT INTO `t0` VALUES (1, 10)\n\
         SQLB: INSERT INTO `t0` VALUES (2, 20)\n\
         SQLS: INSERT INTO `t0` VALUES (3, 30)\n\
         SQLS: UPDATE `t0` SET `c0` = 99 WHERE `pk` = 2\n\
         SQLS: DELETE FROM `t0` WHERE `pk` = 1\n\
         INFO: Cycle finished successfully\n"
    );
    let replayed = rebuild_shadow(&log).unwrap();
    assert!(!replayed.stopped_at_error);
    assert_eq!(replayed.sql_lines, 6);

    let table = &replayed.tables["t0"];
    let rows = table.data.all_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values, vec![Value::Int(2), Value::Int(99)]);
    assert_eq!(rows[1].values, vec![Value::Int(3), Value::Int(30)]);
}

#[test]
fn rebuild_stops_at_first_error_line() {
    let log = format!(
        "{CREATE}\n\
         SQLS: INSERT INTO `t0` VALUES (1, 10)\n\
         ERR:  statement failed: boom\n\
         SQLS: INSERT INTO `t0` VALUES (2, 20)\n"
    );
    let replayed = rebuild_shadow(&log).unwrap();
    assert!(replayed.stopped_at_error);
    assert_eq!(replayed.tables["t0"].data.row_count(), 1);
}

#[test]
fn cli_lines_do_not_touch_the_shadow() {
    let log = format!(
        "CLI:  dolt init\n\
         {CREATE}\n\
         CLI:  dolt add -A\n\
         CLI:  dolt commit -m 'fuzzer checkpoint'\n\
         SQLS: INSERT INTO `t0` VALUES (1, 10)\n"
    );
    let replayed = rebuild_shadow(&log).unwrap();
    assert_eq!(replayed.sql_lines, 2);
    assert_eq!(replayed.tables["t0"].data.row_count(), 1);
}

#[test]
fn unmodelled_schema_statements_are_skipped() {
    let log = format!(
        "{CREATE}\n\
         SQLS: CREATE INDEX `idx0` ON `t0` (`c0`)\n\
         SQLS: INSERT INTO `t0` VALUES (1, 10)\n"
    );
    let replayed = rebuild_shadow(&log).unwrap();
    assert_eq!(replayed.tables["t0"].data.row_count(), 1);
}

#[test]
fn unknown_tag_fails_the_replay() {
    assert!(rebuild_shadow("BOGUS: hello\n").is_err());
}

#[test]
fn tags_are_exactly_six_characters() {
    for (tag, kind) in [
        ("CLI:  ", LogType::Cli),
        ("INFO: ", LogType::Info),
        ("SQLQ: ", LogType::SqlQuery),
        ("SQLB: ", LogType::SqlBatch),
        ("SQLS: ", LogType::SqlServer),
        ("WARN: ", LogType::Warn),
        ("ERR:  ", LogType::Err),
    ] {
        assert_eq!(kind.tag(), tag);
        let parsed = parse_line(&format!("{tag}payload")).unwrap();
        assert_eq!(parsed.kind, kind);
        assert_eq!(parsed.payload, "payload");
    }
}
