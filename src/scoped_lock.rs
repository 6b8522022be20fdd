// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guard that holds a named mutex for the lifetime of a region access.

use crate::{NamedMutex, Result};

/// Locks a [`NamedMutex`] on construction and unlocks it on drop, so every
/// exit path of a guarded access releases the lock.
pub struct ScopedLock<'a> {
    mtx: &'a NamedMutex,
}

impl<'a> ScopedLock<'a> {
    pub fn new(mtx: &'a NamedMutex) -> Result<Self> {
        mtx.lock()?;
        Ok(Self { mtx })
    }

    pub fn mutex(&self) -> &NamedMutex {
        self.mtx
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mtx.unlock() {
            tracing::error!(name = %self.mtx.name(), error = %e, "failed to release named mutex");
        }
    }
}
