// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Native SHIORI modules: locate a shared library and drive its C ABI.
//
//   bool shiori_load(const char* dir_utf8);
//   bool shiori_request(const uint8_t* req, size_t len, uint8_t** res, size_t* res_len);
//   void shiori_unload(void);
//   void shiori_free(uint8_t* res);
//
// The module allocates `res`; the host hands every non-null `res` back to
// `shiori_free` exactly once.

use std::ffi::{c_char, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::Library;

use super::{BackendKind, ModuleBackend};
use crate::{Error, Result};

pub const SYM_LOAD: &str = "shiori_load";
pub const SYM_REQUEST: &str = "shiori_request";
pub const SYM_UNLOAD: &str = "shiori_unload";
pub const SYM_FREE: &str = "shiori_free";

type ShioriLoadFn = unsafe extern "C" fn(*const c_char) -> bool;
type ShioriRequestFn = unsafe extern "C" fn(*const u8, usize, *mut *mut u8, *mut usize) -> bool;
type ShioriUnloadFn = unsafe extern "C" fn();
type ShioriFreeFn = unsafe extern "C" fn(*mut u8);

// ---------------------------------------------------------------------------
// Module file resolution
// ---------------------------------------------------------------------------

/// Library extensions tried for a module stem, most native first.
#[cfg(target_os = "macos")]
const EXTENSIONS: &[&str] = &["dylib", "bundle", "plugin", "so"];

#[cfg(windows)]
const EXTENSIONS: &[&str] = &["dll"];

#[cfg(all(unix, not(target_os = "macos")))]
const EXTENSIONS: &[&str] = &["so", "dylib"];

/// File names to try for a module reference, in order, without duplicates.
///
/// The reference as written comes first, then `stem.<ext>` and
/// `lib<stem>.<ext>` for each platform extension, where `stem` is the file
/// name with its extension removed. `"foo.dll"` therefore also finds
/// `libfoo.so` on Linux and `libfoo.dylib` on macOS.
pub fn candidate_names(module: &str) -> Vec<String> {
    let path = Path::new(module);
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| module.to_owned());
    let stem = Path::new(&base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| base.clone());

    let mut names = vec![base];
    for ext in EXTENSIONS {
        names.push(format!("{stem}.{ext}"));
        names.push(format!("lib{stem}.{ext}"));
    }

    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    names
}

/// Directory the host application ships shared modules in.
///
/// `<exe>/../Frameworks` inside a macOS bundle, the executable's own
/// directory elsewhere.
pub fn host_plugin_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;
    if cfg!(target_os = "macos") {
        dir.parent().map(|p| p.join("Frameworks"))
    } else {
        Some(dir.to_path_buf())
    }
}

/// Ordered directories searched for a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    dirs: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// `<module_dir>`, `<module_dir>/modules`, then the host plugin directory.
    pub fn for_module_dir(module_dir: &Path) -> Self {
        let mut paths = Self::new([module_dir.to_path_buf(), module_dir.join("modules")]);
        if let Some(dir) = host_plugin_dir() {
            paths.push(dir);
        }
        paths
    }

    /// Search paths for a ghost installed under `base` (`base/ghost/master`).
    pub fn for_ghost(base: &Path) -> Self {
        Self::for_module_dir(&base.join("ghost").join("master"))
    }

    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// First existing file over directories × candidate names.
    pub fn find(&self, module: &str) -> Option<PathBuf> {
        let names = candidate_names(module);
        self.dirs
            .iter()
            .flat_map(|dir| names.iter().map(move |n| dir.join(n)))
            .find(|p| p.is_file())
    }
}

// ---------------------------------------------------------------------------
// Result buffer ownership
// ---------------------------------------------------------------------------

/// A buffer allocated by the module. Returned to `shiori_free` on drop, so
/// every path out of a request releases it exactly once.
struct ModuleBuffer {
    ptr: *mut u8,
    len: usize,
    free: Option<ShioriFreeFn>,
}

impl ModuleBuffer {
    fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for ModuleBuffer {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        match self.free {
            Some(free) => unsafe { free(self.ptr) },
            None => tracing::warn!(len = self.len, "module exports no shiori_free; result buffer leaked"),
        }
    }
}

// ---------------------------------------------------------------------------
// NativeBackend
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct EntryPoints {
    load: Option<ShioriLoadFn>,
    request: ShioriRequestFn,
    unload: Option<ShioriUnloadFn>,
    free: Option<ShioriFreeFn>,
}

/// Resolve the four entry points. Only `shiori_request` is mandatory.
///
/// # Safety
/// The symbols must have the signatures declared above. The returned
/// pointers are valid only while `library` stays loaded.
unsafe fn bind(library: &Library) -> Result<EntryPoints> {
    fn symbol_name(name: &str) -> Vec<u8> {
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        bytes
    }

    let request = library
        .get::<ShioriRequestFn>(&symbol_name(SYM_REQUEST))
        .map(|s| *s)
        .map_err(|e| Error::LoadFailed(format!("missing {SYM_REQUEST}: {e}")))?;
    Ok(EntryPoints {
        load: library.get::<ShioriLoadFn>(&symbol_name(SYM_LOAD)).ok().map(|s| *s),
        request,
        unload: library.get::<ShioriUnloadFn>(&symbol_name(SYM_UNLOAD)).ok().map(|s| *s),
        free: library.get::<ShioriFreeFn>(&symbol_name(SYM_FREE)).ok().map(|s| *s),
    })
}

/// A SHIORI module loaded in-process from a shared library.
///
/// Not reentrant: requests are issued one at a time through `&mut self`.
pub struct NativeBackend {
    // Field order matters: entry points must not outlive the library.
    entry: Option<EntryPoints>,
    library: Option<Library>,
    path: PathBuf,
}

impl NativeBackend {
    /// Open the library at `path`, bind its entry points and call
    /// `shiori_load` with the library's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| Error::LoadFailed(format!("{}: {e}", path.display())))?;
        let entry = unsafe { bind(&library) }?;

        if let Some(load) = entry.load {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let dir = dir
                .to_str()
                .and_then(|d| CString::new(d).ok())
                .ok_or_else(|| {
                    Error::LoadFailed(format!("module directory {} is not valid UTF-8", dir.display()))
                })?;
            if !unsafe { load(dir.as_ptr()) } {
                return Err(Error::LoadFailed(format!(
                    "{SYM_LOAD} reported failure for {}",
                    path.display()
                )));
            }
        }

        tracing::info!(
            path = %path.display(),
            has_unload = entry.unload.is_some(),
            has_free = entry.free.is_some(),
            "native SHIORI module loaded"
        );
        Ok(Self {
            entry: Some(entry),
            library: Some(library),
            path: path.to_path_buf(),
        })
    }

    /// Resolve `module` against `search` and load the first match.
    pub fn resolve(module: &str, search: &SearchPaths) -> Result<Self> {
        let path = search.find(module).ok_or_else(|| {
            Error::LoadFailed(format!(
                "module `{module}` not found in {:?}",
                search.dirs()
            ))
        })?;
        tracing::debug!(module, path = %path.display(), "module resolved");
        Self::load(&path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModuleBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn is_loaded(&self) -> bool {
        self.entry.is_some()
    }

    fn request_response(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let entry = self.entry.as_ref().ok_or(Error::NotLoaded)?;

        let mut out_ptr: *mut u8 = ptr::null_mut();
        let mut out_len: usize = 0;
        let ok = unsafe { (entry.request)(request.as_ptr(), request.len(), &mut out_ptr, &mut out_len) };
        let buffer = ModuleBuffer {
            ptr: out_ptr,
            len: out_len,
            free: entry.free,
        };

        if !ok || buffer.ptr.is_null() {
            return Err(Error::ModuleReportedFailure {
                status: 500,
                error: Some(format!("{SYM_REQUEST} returned no result")),
            });
        }
        Ok(buffer.as_slice().to_vec())
    }

    fn unload(&mut self) {
        if let Some(entry) = self.entry.take() {
            if let Some(unload) = entry.unload {
                unsafe { unload() };
            }
        }
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "closing module library failed");
            }
            tracing::info!(path = %self.path.display(), "native SHIORI module unloaded");
        }
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        self.unload();
    }
}
