// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process mutex.
// Delegates to platform::PlatformSemaphore (POSIX or Windows).

use std::io;

use crate::platform::PlatformSemaphore;
use crate::{Error, Result, ScopedLock};

/// A named, inter-process exclusive lock.
///
/// Backed by a named counting semaphore initialised to 1: `lock` waits and
/// decrements, `unlock` posts. The semaphore has no owner tracking, so an
/// unmatched `unlock` silently raises the count and breaks exclusion; prefer
/// [`NamedMutex::guard`], which pairs the two.
///
/// `lock` has no timeout. Callers needing bounded waits layer their own
/// timer around it or poll [`NamedMutex::try_lock`].
pub struct NamedMutex {
    inner: Option<PlatformSemaphore>,
    name: String,
    owned: bool,
}

impl NamedMutex {
    /// Exclusively create the named mutex.
    ///
    /// Returns [`Error::AlreadyHeld`] when a mutex with this name already
    /// exists, and [`Error::System`] for any other OS failure.
    pub fn create(name: &str) -> Result<Self> {
        let sem = PlatformSemaphore::create(name, 1).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::AlreadyHeld {
                    name: name.to_owned(),
                }
            } else {
                Error::system(format!("creating named mutex `{name}`"), e)
            }
        })?;
        Ok(Self {
            inner: Some(sem),
            name: name.to_owned(),
            owned: true,
        })
    }

    /// Attach to a mutex another process created. Closing an attached
    /// handle leaves the name in place for its creator.
    pub fn attach(name: &str) -> Result<Self> {
        let sem = PlatformSemaphore::open(name)
            .map_err(|e| Error::system(format!("attaching to named mutex `{name}`"), e))?;
        Ok(Self {
            inner: Some(sem),
            name: name.to_owned(),
            owned: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this handle created the OS object rather than attaching to it.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// False once [`NamedMutex::close`] has run.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn sem(&self) -> Result<&PlatformSemaphore> {
        self.inner.as_ref().ok_or_else(|| {
            Error::system(
                format!("named mutex `{}`", self.name),
                io::Error::new(io::ErrorKind::NotConnected, "mutex is closed"),
            )
        })
    }

    /// Block until the lock is acquired.
    pub fn lock(&self) -> Result<()> {
        self.sem()?
            .wait()
            .map_err(|e| Error::system(format!("waiting on named mutex `{}`", self.name), e))
    }

    /// Acquire without blocking. `Ok(false)` if another holder has it.
    pub fn try_lock(&self) -> Result<bool> {
        self.sem()?
            .try_wait()
            .map_err(|e| Error::system(format!("polling named mutex `{}`", self.name), e))
    }

    /// Release the lock. Never blocks.
    pub fn unlock(&self) -> Result<()> {
        self.sem()?
            .post()
            .map_err(|e| Error::system(format!("releasing named mutex `{}`", self.name), e))
    }

    /// Lock and return a guard that unlocks when dropped.
    pub fn guard(&self) -> Result<ScopedLock<'_>> {
        ScopedLock::new(self)
    }

    /// Close the local handle and, if this handle created the mutex, remove
    /// its name. Idempotent.
    pub fn close(&mut self) {
        if let Some(sem) = self.inner.take() {
            if self.owned {
                sem.unlink();
            }
            tracing::debug!(name = %self.name, os_name = sem.name(), owned = self.owned, "named mutex closed");
        }
    }

    /// Remove a leftover name (e.g. after a crashed creator).
    pub fn clear_storage(name: &str) {
        PlatformSemaphore::unlink_by_name(name);
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        self.close();
    }
}
