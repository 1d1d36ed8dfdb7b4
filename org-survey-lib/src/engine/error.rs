use core::fmt;
use core::time::Duration;
use ohno::app_err;
use std::sync::Arc;

/// The closed set of failure classes a remote call can produce.
///
/// Classification happens once, where the HTTP response is inspected. Everything
/// downstream (the retry executor, the pipeline) only looks at the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials were rejected. Never retried, and aborts a pipeline run.
    Auth,

    /// An upstream rate limit was hit. Retried, honoring any retry-after hint.
    RateLimit,

    /// Network trouble or a server-side error. Retried with backoff.
    Transient,

    /// The request can never succeed as issued (missing entity, no access, bad payload).
    Fatal,

    /// The surrounding operation was canceled.
    Canceled,
}

impl ErrorKind {
    /// Whether errors of this kind are worth another attempt.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Transient)
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Auth => "authentication",
            Self::RateLimit => "rate limit",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A remote-call failure tagged with its [`ErrorKind`].
///
/// Cheap to clone; the underlying cause is shared.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    kind: ErrorKind,
    retry_after: Option<Duration>,
    cause: Arc<ohno::AppError>,
    attempts: Option<u32>,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(kind: ErrorKind, cause: ohno::AppError) -> Self {
        Self {
            kind,
            retry_after: None,
            cause: Arc::new(cause),
            attempts: None,
        }
    }

    #[must_use]
    pub fn auth(cause: ohno::AppError) -> Self {
        Self::new(ErrorKind::Auth, cause)
    }

    /// A rate-limit failure, optionally carrying the upstream's suggested wait.
    #[must_use]
    pub fn rate_limited(cause: ohno::AppError, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimit, cause)
        }
    }

    #[must_use]
    pub fn transient(cause: ohno::AppError) -> Self {
        Self::new(ErrorKind::Transient, cause)
    }

    #[must_use]
    pub fn fatal(cause: ohno::AppError) -> Self {
        Self::new(ErrorKind::Fatal, cause)
    }

    #[must_use]
    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, app_err!("operation canceled"))
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether another attempt may succeed. Always `false` once retries are exhausted.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.attempts.is_none() && self.kind.is_retryable()
    }

    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self.kind, ErrorKind::Canceled)
    }

    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    #[must_use]
    pub fn cause(&self) -> &ohno::AppError {
        &self.cause
    }

    /// Number of attempts made, if this error ended a retry loop.
    #[must_use]
    pub const fn attempts(&self) -> Option<u32> {
        self.attempts
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempts.is_some()
    }

    /// Mark this as the final error of a retry loop that made `attempts` calls.
    #[must_use]
    pub fn exhausted(self, attempts: u32) -> Self {
        Self {
            attempts: Some(attempts),
            ..self
        }
    }

    /// Prefix the cause with a description of what was being attempted.
    #[must_use]
    pub fn context(self, what: impl fmt::Display) -> Self {
        Self {
            cause: Arc::new(app_err!("{what}: {:#}", self.cause)),
            ..self
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(attempts) = self.attempts {
            write!(f, "max retries reached after {attempts} attempt(s): ")?;
        }
        write!(f, "{} error: {:#}", self.kind, self.cause)
    }
}

impl core::error::Error for ClassifiedError {}
