//! Per-cycle log file.
//!
//! `log.txt` is functional output: it is the input format of
//! `replay-validate`. Every line starts with a six-character type tag
//! followed by the payload. Operator-facing diagnostics go through
//! `tracing` instead and never end up here.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use crate::error::{ErrorContext as _, FuzzerError, Result};

// ---------------------------------------------------------------------------
// LogType
// ---------------------------------------------------------------------------

/// Line type tags. Each renders as exactly six characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogType {
    /// A CLI invocation of the database binary.
    Cli,
    /// Informational marker.
    Info,
    /// SQL over the one-shot CLI query transport.
    SqlQuery,
    /// SQL over the batched CLI transport.
    SqlBatch,
    /// SQL over the server transport.
    SqlServer,
    Warn,
    Err,
}

impl LogType {
    /// The six-character tag, padding included.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Cli => "CLI:  ",
            Self::Info => "INFO: ",
            Self::SqlQuery => "SQLQ: ",
            Self::SqlBatch => "SQLB: ",
            Self::SqlServer => "SQLS: ",
            Self::Warn => "WARN: ",
            Self::Err => "ERR:  ",
        }
    }

    /// Recognize a tag prefix.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "CLI:  " => Some(Self::Cli),
            "INFO: " => Some(Self::Info),
            "SQLQ: " => Some(Self::SqlQuery),
            "SQLB: " => Some(Self::SqlBatch),
            "SQLS: " => Some(Self::SqlServer),
            "WARN: " => Some(Self::Warn),
            "ERR:  " => Some(Self::Err),
            _ => None,
        }
    }
}

/// Width of every tag.
pub const TAG_LEN: usize = 6;

// ---------------------------------------------------------------------------
// CycleLogger
// ---------------------------------------------------------------------------

/// Buffered writer for a cycle's `log.txt`.
///
/// With `Options.Logging = false` the logger swallows lines; replay is then
/// unavailable for that run.
#[derive(Debug)]
pub struct CycleLogger {
    writer: Option<BufWriter<File>>,
}

impl CycleLogger {
    /// Open `log.txt` under `dir`, or a disabled logger.
    pub fn open(dir: &Path, enabled: bool) -> Result<Self> {
        if !enabled {
            return Ok(Self { writer: None });
        }
        let path = dir.join("log.txt");
        let file =
            File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
        })
    }

    /// A logger that drops everything (tests, replay).
    #[must_use]
    pub fn disabled() -> Self {
        Self { writer: None }
    }

    /// Append one line.
    pub fn log(&mut self, kind: LogType, payload: &str) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writeln!(writer, "{}{payload}", kind.tag()).context("writing log line")?;
        }
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.flush().context("flushing log")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing (replay input)
// ---------------------------------------------------------------------------

/// One parsed log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub kind: LogType,
    pub payload: String,
}

/// Parse a log line into tag and payload.
pub fn parse_line(line: &str) -> Result<LogLine> {
    if line.len() < TAG_LEN {
        return Err(FuzzerError::new(format!("log line too short: {line:?}")));
    }
    let (tag, payload) = line.split_at(TAG_LEN);
    let kind = LogType::from_tag(tag)
        .ok_or_else(|| FuzzerError::new(format!("unknown log tag {tag:?}")))?;
    Ok(LogLine {
        kind,
        payload: payload.to_owned(),
    })
}

// ---------------------------------------------------------------------------
// CLI argument rendering (replay input)
// ---------------------------------------------------------------------------

/// Render CLI arguments for a `CLI:  ` log line. Arguments containing
/// whitespace are single-quoted so [`split_cli_args`] can reverse the
/// rendering during replay.
#[must_use]
pub fn render_cli_args(args: &[&str]) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                format!("'{}'", arg.replace('\'', "'\\''"))
            } else {
                (*arg).to_owned()
            }
        })
        .collect();
    rendered.join(" ")
}

/// Split a rendered CLI argument line back into arguments.
pub fn split_cli_args(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_quotes => {
                in_quotes = true;
                has_token = true;
            }
            '\'' if in_quotes => {
                // "'\\''" renders an embedded quote.
                if chars.peek() == Some(&'\\') {
                    chars.next();
                    if chars.next() == Some('\'') && chars.next() == Some('\'') {
                        current.push('\'');
                        continue;
                    }
                    return Err(FuzzerError::new(format!("malformed CLI line {line:?}")));
                }
                in_quotes = false;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err(FuzzerError::new(format!("unterminated quote in {line:?}")));
    }
    if has_token {
        args.push(current);
    }
    Ok(args)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn tags_are_six_characters() {
        let all = [
            LogType::Cli,
            LogType::Info,
            LogType::SqlQuery,
            LogType::SqlBatch,
            LogType::SqlServer,
            LogType::Warn,
            LogType::Err,
        ];
        for kind in all {
            assert_eq!(kind.tag().len(), TAG_LEN, "{kind:?}");
            assert_eq!(LogType::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn written_lines_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = CycleLogger::open(dir.path(), true).unwrap();
        logger.log(LogType::Cli, "dolt init").unwrap();
        logger
            .log(LogType::SqlServer, "INSERT INTO `t` VALUES (1)")
            .unwrap();
        logger.log(LogType::Info, "Cycle finished successfully").unwrap();
        logger.flush().unwrap();

        let text = fs::read_to_string(dir.path().join("log.txt")).unwrap();
        let lines: Vec<LogLine> = text.lines().map(|l| parse_line(l).unwrap()).collect();
        assert_eq!(
            lines,
            vec![
                LogLine {
                    kind: LogType::Cli,
                    payload: "dolt init".to_owned()
                },
                LogLine {
                    kind: LogType::SqlServer,
                    payload: "INSERT INTO `t` VALUES (1)".to_owned()
                },
                LogLine {
                    kind: LogType::Info,
                    payload: "Cycle finished successfully".to_owned()
                },
            ]
        );
    }

    #[test]
    fn disabled_logger_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = CycleLogger::open(dir.path(), false).unwrap();
        logger.log(LogType::Info, "hidden").unwrap();
        logger.flush().unwrap();
        assert!(!dir.path().join("log.txt").exists());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(parse_line("NOPE: xyz").is_err());
    }

    #[test]
    fn short_line_is_rejected() {
        assert!(parse_line("CLI").is_err());
    }

    #[test]
    fn cli_args_round_trip_plain() {
        let rendered = render_cli_args(&["checkout", "main"]);
        assert_eq!(rendered, "checkout main");
        assert_eq!(
            split_cli_args(&rendered).unwrap(),
            vec!["checkout".to_owned(), "main".to_owned()]
        );
    }

    #[test]
    fn cli_args_round_trip_with_spaces() {
        let args = ["commit", "-m", "fuzzer checkpoint"];
        let rendered = render_cli_args(&args);
        assert_eq!(rendered, "commit -m 'fuzzer checkpoint'");
        let split = split_cli_args(&rendered).unwrap();
        assert_eq!(split, vec!["commit", "-m", "fuzzer checkpoint"]);
    }

    #[test]
    fn cli_args_round_trip_with_embedded_quote() {
        let args = ["sql", "-q", "it's quoted"];
        let rendered = render_cli_args(&args);
        let split = split_cli_args(&rendered).unwrap();
        assert_eq!(split, vec!["sql", "-q", "it's quoted"]);
    }

    #[test]
    fn split_rejects_unterminated_quote() {
        assert!(split_cli_args("commit 'open").is_err());
    }

    #[test]
    fn err_tag_round_trips() {
        let line = format!("{}cycle failed: boom", LogType::Err.tag());
        let parsed = parse_line(&line).unwrap();
        assert_eq!(parsed.kind, LogType::Err);
        assert_eq!(parsed.payload, "cycle failed: boom");
    }
}
