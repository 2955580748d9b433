//! Fuzzer error type.
//!
//! Defines [`FuzzerError`], the structured error used throughout the engine.
//! Every error carries a message, an optional source forming a message chain,
//! and a stack trace captured when the innermost [`FuzzerError`] was built.
//! Wrapping an existing error never recaptures the trace — the innermost one
//! is authoritative.
//!
//! A cycle-level error may be flagged *ignorable*: the cycle is discarded and
//! not counted rather than reported as a defect. The flag survives any depth
//! of wrapping; [`FuzzerError::is_ignorable`] walks the whole chain.

use std::backtrace::Backtrace;
use std::fmt;

/// Result alias used by the engine modules.
pub type Result<T, E = FuzzerError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// FuzzerError
// ---------------------------------------------------------------------------

/// Structured engine error: message chain + innermost stack trace +
/// ignorable flag.
#[derive(Debug)]
pub struct FuzzerError {
    message: String,
    ignorable: bool,
    /// Captured only when this error is a chain root.
    backtrace: Option<Backtrace>,
    source: Option<ErrorSource>,
}

#[derive(Debug)]
enum ErrorSource {
    Fuzzer(Box<FuzzerError>),
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl FuzzerError {
    /// Create a new root error. Captures the stack trace here.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ignorable: false,
            backtrace: Some(Backtrace::force_capture()),
            source: None,
        }
    }

    /// Create a new root error flagged ignorable.
    ///
    /// Ignorable errors mark the cycle as an environmental misfire to be
    /// discarded (and its counter rewound), not a defect in the database.
    pub fn ignorable(message: impl Into<String>) -> Self {
        Self {
            ignorable: true,
            ..Self::new(message)
        }
    }

    /// Wrap an existing fuzzer error with an outer message.
    ///
    /// The trace of the innermost error is kept; no new trace is captured.
    #[must_use]
    pub fn wrap(message: impl Into<String>, inner: Self) -> Self {
        Self {
            message: message.into(),
            ignorable: false,
            backtrace: None,
            source: Some(ErrorSource::Fuzzer(Box::new(inner))),
        }
    }

    /// Wrap a foreign error (I/O, SQL client, CSV, ...) as the chain root.
    ///
    /// The trace is captured here, at the first wrap.
    pub fn external(
        message: impl Into<String>,
        inner: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            ignorable: false,
            backtrace: Some(Backtrace::force_capture()),
            source: Some(ErrorSource::Other(Box::new(inner))),
        }
    }

    /// True iff this error or any nested error carries the ignorable flag.
    #[must_use]
    pub fn is_ignorable(&self) -> bool {
        if self.ignorable {
            return true;
        }
        match &self.source {
            Some(ErrorSource::Fuzzer(inner)) => inner.is_ignorable(),
            _ => false,
        }
    }

    /// The outermost message, without the chain.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The innermost captured stack trace, if any.
    #[must_use]
    pub fn trace(&self) -> Option<&Backtrace> {
        if let Some(ErrorSource::Fuzzer(inner)) = &self.source {
            if let Some(bt) = inner.trace() {
                return Some(bt);
            }
        }
        self.backtrace.as_ref()
    }

    fn write_chain(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        match &self.source {
            Some(ErrorSource::Fuzzer(inner)) => {
                f.write_str(": ")?;
                inner.write_chain(f)
            }
            Some(ErrorSource::Other(inner)) => {
                write!(f, ": {inner}")
            }
            None => Ok(()),
        }
    }
}

impl fmt::Display for FuzzerError {
    /// `{}` renders the message chain; `{:#}` appends the innermost trace.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_chain(f)?;
        if f.alternate() {
            if let Some(bt) = self.trace() {
                write!(f, "\n{bt}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for FuzzerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(ErrorSource::Fuzzer(inner)) => Some(inner.as_ref()),
            Some(ErrorSource::Other(inner)) => Some(inner.as_ref()),
            None => None,
        }
    }
}

impl From<std::io::Error> for FuzzerError {
    fn from(err: std::io::Error) -> Self {
        Self::external("I/O error", err)
    }
}

impl From<csv::Error> for FuzzerError {
    fn from(err: csv::Error) -> Self {
        Self::external("CSV error", err)
    }
}

impl From<mysql::Error> for FuzzerError {
    fn from(err: mysql::Error) -> Self {
        Self::external("SQL connection error", err)
    }
}

// ---------------------------------------------------------------------------
// ErrorContext
// ---------------------------------------------------------------------------

/// Extension trait adding a message to the chain of a failing result.
pub trait ErrorContext<T> {
    /// Wrap the error with `message`.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built message.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| FuzzerError::wrap(message, e))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| FuzzerError::wrap(f(), e))
    }
}

impl<T> ErrorContext<T> for std::result::Result<T, std::io::Error> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| FuzzerError::external(message, e))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| FuzzerError::external(f(), e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_single_message() {
        let err = FuzzerError::new("server did not start");
        assert_eq!(format!("{err}"), "server did not start");
    }

    #[test]
    fn display_chain_joins_with_colon() {
        let inner = FuzzerError::new("connection refused");
        let mid = FuzzerError::wrap("ping failed", inner);
        let outer = FuzzerError::wrap("cycle aborted", mid);
        assert_eq!(
            format!("{outer}"),
            "cycle aborted: ping failed: connection refused"
        );
    }

    #[test]
    fn display_chain_includes_foreign_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = FuzzerError::external("opening log", io);
        assert_eq!(format!("{err}"), "opening log: no such file");
    }

    #[test]
    fn alternate_format_appends_trace() {
        let err = FuzzerError::new("boom");
        let rendered = format!("{err:#}");
        assert!(rendered.starts_with("boom"));
        assert!(rendered.len() > "boom".len());
    }

    #[test]
    fn ignorable_flag_on_root() {
        let err = FuzzerError::ignorable("server start timeout");
        assert!(err.is_ignorable());
    }

    #[test]
    fn ignorable_flag_survives_wrapping() {
        let inner = FuzzerError::ignorable("server start timeout");
        let outer = FuzzerError::wrap("cycle failed", FuzzerError::wrap("interface", inner));
        assert!(outer.is_ignorable());
    }

    #[test]
    fn non_ignorable_by_default() {
        let err = FuzzerError::wrap("outer", FuzzerError::new("inner"));
        assert!(!err.is_ignorable());
    }

    #[test]
    fn trace_comes_from_innermost() {
        let inner = FuzzerError::new("root cause");
        let inner_trace = format!("{}", inner.trace().expect("root has trace"));
        let outer = FuzzerError::wrap("wrapped", inner);
        assert!(outer.backtrace.is_none());
        let outer_trace = format!("{}", outer.trace().expect("chain has trace"));
        assert_eq!(inner_trace, outer_trace);
    }

    #[test]
    fn source_chain_walks() {
        let err = FuzzerError::wrap("outer", FuzzerError::new("inner"));
        let src = std::error::Error::source(&err).expect("has source");
        assert_eq!(format!("{src}"), "inner");
    }

    #[test]
    fn context_wraps_message() {
        fn fails() -> Result<()> {
            Err(FuzzerError::new("inner"))
        }
        let err = fails().context("while doing the thing").unwrap_err();
        assert_eq!(format!("{err}"), "while doing the thing: inner");
    }

    #[test]
    fn io_context_captures_foreign_root() {
        let r: std::result::Result<(), std::io::Error> = Err(std::io::Error::other("disk full"));
        let err = r.context("writing metrics").unwrap_err();
        assert_eq!(format!("{err}"), "writing metrics: disk full");
        assert!(err.trace().is_some());
    }
}
