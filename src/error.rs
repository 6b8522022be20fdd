// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared by the registry primitives and the module backends.

use std::io;

/// Errors surfaced by the runtime.
///
/// Resource acquisition (`AlreadyHeld`, `AlreadyRunning`, `System`) always
/// propagates to the caller. Backend failures are split between channel
/// problems (`TransportFailed`) and module-level refusals
/// (`ModuleReportedFailure`) so the host can pick restart vs. degrade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A named semaphore with this name already exists.
    #[error("named mutex `{name}` is already held by another instance")]
    AlreadyHeld { name: String },

    /// Another host instance owns the registry.
    #[error("another instance already owns registry mutex `{name}`")]
    AlreadyRunning { name: String },

    /// An OS primitive failed; the OS diagnostic is kept as the source.
    #[error("{context}: {source}")]
    System {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Module resolution, library open or mandatory symbol binding failed.
    #[error("module load failed: {0}")]
    LoadFailed(String),

    /// The backend has no usable module bound.
    #[error("module is not loaded")]
    NotLoaded,

    /// The helper process channel broke (closed pipe, bad JSON, cut-off line, timeout).
    #[error("transport failed: {0}")]
    TransportFailed(String),

    /// The helper answered, but with `ok: false`.
    #[error("module reported failure (status {status}): {}", .error.as_deref().unwrap_or("no detail"))]
    ModuleReportedFailure { status: i32, error: Option<String> },

    /// Caller supplied an argument the OS layer cannot accept (empty name, zero size, NUL byte).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn system(context: impl Into<String>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::InvalidInput {
            return Error::InvalidInput(format!("{}: {source}", context.into()));
        }
        Error::System {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn transport(detail: impl Into<String>) -> Self {
        Error::TransportFailed(detail.into())
    }

    /// True when the caller should treat itself as a secondary instance.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Error::AlreadyRunning { .. } | Error::AlreadyHeld { .. })
    }

    /// True when the backend should be torn down and recreated.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportFailed(_))
    }
}
