// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Error handling: the [`Error`] type and macros for constructing it.

use std::fmt::Write as _;

/// Error kind.
///
/// These codes are taken from
/// [grpc::StatusCode](https://github.com/grpc/grpc/blob/0e00c430827e81d61e1e7164ef04ca21ccbfaa77/include/grpcpp/impl/codegen/status_code_enum.h),
/// which is a nice general-purpose classification of errors. See that link for descriptions of
/// each error.
#[derive(Copy, Clone, Eq, PartialEq, Debug, thiserror::Error)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum ErrorKind {
    #[error("Cancelled")] Cancelled,
    #[error("Unknown")] Unknown,
    #[error("Invalid argument")] InvalidArgument,
    #[error("Deadline exceeded")] DeadlineExceeded,
    #[error("Not found")] NotFound,
    #[error("Already exists")] AlreadyExists,
    #[error("Permission denied")] PermissionDenied,
    #[error("Unauthenticated")] Unauthenticated,
    #[error("Resource exhausted")] ResourceExhausted,
    #[error("Failed precondition")] FailedPrecondition,
    #[error("Aborted")] Aborted,
    #[error("Out of range")] OutOfRange,
    #[error("Unimplemented")] Unimplemented,
    #[error("Internal")] Internal,
    #[error("Unavailable")] Unavailable,
    #[error("Data loss")] DataLoss,
}

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<BoxedError>,
}

/// An error with a classification kind, an optional message, and an optional source.
///
/// Use via the [`crate::err!`] and [`crate::bail!`] macros, or
/// [`ResultExt::err_kind`] when annotating a foreign error.
#[derive(Debug)]
pub struct Error(Box<ErrorInner>);

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error(Box::new(ErrorInner {
            kind,
            msg: None,
            source: None,
        }))
    }

    pub fn with_msg(mut self, msg: String) -> Self {
        self.0.msg = Some(msg);
        self
    }

    pub fn with_source<S: Into<BoxedError>>(mut self, source: S) -> Self {
        self.0.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn msg(&self) -> Option<&str> {
        self.0.msg.as_deref()
    }

    /// Returns a single-line rendering of this error and all its sources,
    /// for use in log fields: `err = %e.chain()`.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.0.source.as_deref().map(|e| e as &dyn std::error::Error);
        while let Some(e) = source {
            write!(&mut out, ": {e}").expect("writing to String is infallible");
            source = e.source();
        }
        out
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.msg.as_deref() {
            None => std::fmt::Display::fmt(&self.0.kind, f),
            Some(m) => write!(f, "{}: {}", self.0.kind, m),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source.as_deref().map(|e| e as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            std::io::ErrorKind::TimedOut => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::Unknown,
        };
        Error::new(kind).with_source(e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::new(ErrorKind::Internal).with_source(e)
    }
}

impl From<jiff::Error> for Error {
    fn from(e: jiff::Error) -> Self {
        Error::new(ErrorKind::InvalidArgument).with_source(e)
    }
}

impl From<crate::shutdown::ShutdownError> for Error {
    fn from(e: crate::shutdown::ShutdownError) -> Self {
        Error::new(ErrorKind::Cancelled).with_source(e)
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T> {
    /// Annotates an error with the given kind.
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<BoxedError>,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::new(k).with_source(e))
    }
}

/// Constructs an [`Error`], tersely.
///
/// The first argument is an `ErrorKind` variant name; the remaining arguments
/// are `msg(...)` (format args) and/or `source(...)` (an error to wrap), in
/// either order.
///
/// Example:
/// ```
/// use memory_lane_base::err;
/// let e = err!(Unauthenticated, msg("unknown user: {}", "slamb"));
/// assert_eq!(e.kind(), memory_lane_base::ErrorKind::Unauthenticated);
/// assert_eq!(e.to_string(), "Unauthenticated: unknown user: slamb");
/// ```
#[macro_export]
macro_rules! err {
    ($kind:ident) => {
        $crate::Error::new($crate::ErrorKind::$kind)
    };
    ($kind:ident, msg($($msg:tt)*)) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_msg(format!($($msg)*))
    };
    ($kind:ident, source($source:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind).with_source($source)
    };
    ($kind:ident, msg($($msg:tt)*), source($source:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind)
            .with_msg(format!($($msg)*))
            .with_source($source)
    };
    ($kind:ident, source($source:expr), msg($($msg:tt)*)) => {
        $crate::Error::new($crate::ErrorKind::$kind)
            .with_msg(format!($($msg)*))
            .with_source($source)
    };
}

/// Constructs an [`Error`] as in [`crate::err!`] and returns it.
#[macro_export]
macro_rules! bail {
    ($($t:tt)*) => {
        return Err($crate::err!($($t)*).into())
    };
}
