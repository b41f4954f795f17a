//! Error types surfaced to the orchestrator entry point.
//!
//! There are no recoverable errors inside the T-state loop: memory reads and
//! writes cannot fail, and unmatched IO ports return `0xFF` rather than an
//! error. Every `SpectrumError` originates at a loader boundary (file I/O,
//! CLI parsing, presenter init).

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while loading files or starting the presenter.
#[derive(Debug)]
pub enum SpectrumError {
    /// A required file does not exist. Carries the underlying I/O error so
    /// callers can inspect `source()` for the OS-level cause.
    FileNotFound(PathBuf, std::io::Error),

    /// A loaded file is shorter than the region it is meant to fill.
    FileTooSmall {
        path: PathBuf,
        need: usize,
        got: usize,
    },

    /// A `.SNA` payload failed to parse.
    InvalidSnapshot(String),

    /// The presenter (window/texture) failed to initialize.
    PresenterInit(String),

    /// An unrecognized CLI argument.
    BadArgument(String),
}

impl fmt::Display for SpectrumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound(path, _) => write!(f, "file not found: {}", path.display()),
            Self::FileTooSmall { path, need, got } => write!(
                f,
                "{}: expected at least {need} bytes, got {got}",
                path.display()
            ),
            Self::InvalidSnapshot(reason) => write!(f, "invalid snapshot: {reason}"),
            Self::PresenterInit(reason) => write!(f, "presenter init failed: {reason}"),
            Self::BadArgument(arg) => write!(f, "unrecognized argument: {arg}"),
        }
    }
}

impl std::error::Error for SpectrumError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FileNotFound(_, e) => Some(e),
            Self::FileTooSmall { .. }
            | Self::InvalidSnapshot(_)
            | Self::PresenterInit(_)
            | Self::BadArgument(_) => None,
        }
    }
}
