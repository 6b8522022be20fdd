// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Interchangeable SHIORI module backends.
//
// A backend is chosen once from a BackendConfig; callers then talk to it
// only through the ModuleBackend trait.

pub mod frame;
pub mod native;
pub mod subprocess;

use std::fmt;
use std::path::{Path, PathBuf};

pub use native::{candidate_names, NativeBackend, SearchPaths};
pub use subprocess::{HelperRequest, HelperResponse, SubprocessBackend, SubprocessConfig};

use crate::descript::Descript;
use crate::{Error, Result};

/// Module name that selects the helper-process backend.
pub const YAYA_MODULE: &str = "yaya.dll";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Native,
    Subprocess,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Native => "native",
            BackendKind::Subprocess => "subprocess",
        })
    }
}

/// A loaded SHIORI module. Loading happens when the backend is built;
/// see [`BackendConfig::load`].
///
/// Neither implementation is reentrant: one request at a time.
pub trait ModuleBackend: Send {
    fn kind(&self) -> BackendKind;

    fn is_loaded(&self) -> bool;

    /// Send one SHIORI request as raw bytes, get the raw response.
    ///
    /// [`Error::NotLoaded`] after [`unload`](Self::unload).
    fn request_response(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Release the module. Idempotent.
    fn unload(&mut self);
}

/// How to bring up a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Shared library resolved through [`SearchPaths`].
    Native { module: String, search: SearchPaths },
    /// Helper process fed the ghost's dictionaries.
    Subprocess {
        helper: SubprocessConfig,
        ghost_root: PathBuf,
        dics: Vec<String>,
        encoding: String,
    },
}

impl BackendConfig {
    /// Native module under `base/ghost/master` (and its `modules` dir).
    pub fn native(base: &Path, module: &str) -> Self {
        BackendConfig::Native {
            module: module.to_owned(),
            search: SearchPaths::for_ghost(base),
        }
    }

    /// Configuration for the ghost installed at `base`, from its
    /// `ghost/master/descript.txt`.
    pub fn for_ghost(base: &Path) -> Result<Self> {
        let descript = Descript::load(&base.join("ghost").join("master").join("descript.txt"))?;
        Self::for_module(base, descript.shiori(), &descript)
    }

    /// `yaya.dll` selects the helper backend with the dictionaries listed in
    /// `descript`; anything else is loaded natively.
    pub fn for_module(base: &Path, module: &str, descript: &Descript) -> Result<Self> {
        let file_name = Path::new(module)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if file_name != YAYA_MODULE {
            return Ok(Self::native(base, module));
        }

        let dics = descript.yaya_dics();
        if dics.is_empty() {
            return Err(Error::LoadFailed("descript.txt lists no yaya.dic entries".to_owned()));
        }
        Ok(BackendConfig::Subprocess {
            helper: SubprocessConfig::locate()?,
            ghost_root: base.join("ghost").join("master"),
            dics,
            encoding: "utf-8".to_owned(),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Native { .. } => BackendKind::Native,
            BackendConfig::Subprocess { .. } => BackendKind::Subprocess,
        }
    }

    /// Build and load the backend.
    pub fn load(self) -> Result<Box<dyn ModuleBackend>> {
        match self {
            BackendConfig::Native { module, search } => Ok(Box::new(NativeBackend::resolve(&module, &search)?)),
            BackendConfig::Subprocess {
                helper,
                ghost_root,
                dics,
                encoding,
            } => {
                let mut backend = SubprocessBackend::launch(helper)?;
                backend.load(&ghost_root, &dics, &encoding)?;
                Ok(Box::new(backend))
            }
        }
    }
}
