//! Platform error taxonomy.
//!
//! One error type for all lattice crates: a kind (mapping to an HTTP
//! status at the edge), a human message, a key/value details bag, and an
//! optional source. Wrapping with extra context never changes the kind
//! of the innermost error.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error as ThisError;

/// Result type used across the lattice crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification. The variant decides how the edge reports the
/// failure; the `details` bag on [`Error`] carries the specifics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-visible input problem: missing key, empty input, dimension
    /// mismatch, unknown role, invalid schema.
    Validation,
    /// Unknown job id, vector id, or index.
    NotFound,
    /// Worker already running, duplicate index create.
    Conflict,
    /// Operational signal such as retries exhausted or a rate limit.
    Business,
    /// Backend store unreachable, LLM/embedder failure, transient DB
    /// error.
    External,
    /// Marshal/unmarshal failures and programming errors.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Business => "business",
            ErrorKind::External => "external",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status code reported at the service edge.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Business => 422,
            ErrorKind::External => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform error: kind + message + details bag + optional source.
#[derive(Debug, ThisError)]
#[error("{}", format_error(.kind, .message, .details))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    details: BTreeMap<String, String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a key/value detail, e.g. `{queue, job_id, expected_dim}`.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Wrap with an outer message. The kind and details of `self` are
    /// preserved; the wrapped error becomes the source.
    pub fn context(self, message: impl Into<String>) -> Self {
        let kind = self.kind;
        let details = self.details.clone();
        Self {
            kind,
            message: message.into(),
            details,
            source: Some(Box::new(SourceError(self.to_string(), self.source))),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &BTreeMap<String, String> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }
}

fn format_error(
    kind: &ErrorKind,
    message: &str,
    details: &BTreeMap<String, String>,
) -> String {
    let mut out = format!("{kind}: {message}");
    if !details.is_empty() {
        out.push_str(" (");
        for (i, (k, v)) in details.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out.push(')');
    }
    out
}

/// Flattened inner error used when re-wrapping preserves the chain.
#[derive(Debug, ThisError)]
#[error("{0}")]
struct SourceError(
    String,
    #[source] Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
);

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal("serialization failed").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_to_http_status() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::External.http_status(), 502);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn context_preserves_kind_and_details() {
        let err = Error::not_found("no such job")
            .with_detail("job_id", "j-42")
            .context("while polling status");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.detail("job_id"), Some("j-42"));
        assert!(err.to_string().contains("while polling status"));
        // The inner message survives in the source chain.
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("no such job"));
    }

    #[test]
    fn display_includes_details() {
        let err = Error::validation("dimension mismatch")
            .with_detail("expected_dim", 3)
            .with_detail("got_dim", 4);
        let text = err.to_string();
        assert!(text.starts_with("validation: dimension mismatch"));
        assert!(text.contains("expected_dim=3"));
        assert!(text.contains("got_dim=4"));
    }
}
