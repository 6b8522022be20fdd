// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SHIORI module runtime: the FMO instance registry (named mutex + shared
// region), the SHIORI/3.0 wire protocol, and two interchangeable module
// backends (in-process shared library, JSON-line helper process).

pub mod shm_name;

mod platform;

mod error;
pub use error::{Error, Result};

mod mutex;
pub use mutex::NamedMutex;

mod scoped_lock;
pub use scoped_lock::ScopedLock;

pub mod region;
pub use region::SharedRegion;

pub mod fmo;
pub use fmo::{FmoConfig, FmoRegistry};

pub mod proto;
pub use proto::{ShioriRequest, ShioriResponse};

pub mod backend;
pub use backend::{BackendConfig, BackendKind, ModuleBackend};

pub mod descript;
pub mod host;
pub use host::ShioriHost;

pub mod process;
