// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed-size shared memory block holding one length-prefixed payload.
// Delegates to platform::PlatformRegion (POSIX or Windows).

use std::io;
use std::ptr;

use crate::platform::PlatformRegion;
use crate::{Error, NamedMutex, Result};

/// Default region size, matching the classic FMO block.
pub const DEFAULT_REGION_SIZE: usize = 64 * 1024;

/// Width of the native-endian `u32` length prefix at offset 0.
pub const LEN_PREFIX: usize = 4;

/// Length prefix plus the trailing NUL sentinel.
const OVERHEAD: usize = LEN_PREFIX + 1;

/// Largest payload the length prefix can describe.
const MAX_PAYLOAD: usize = u32::MAX as usize;

/// A named, inter-process shared memory block.
///
/// Layout: `[u32 len][len payload bytes][0]`, with `len <= size - 5`.
///
/// The region has no internal synchronisation. Every access must go through
/// [`SharedRegion::write_guarded`] / [`SharedRegion::read_guarded`] with the
/// mutex paired with this region; this is a convention, the type cannot
/// enforce it.
pub struct SharedRegion {
    inner: Option<PlatformRegion>,
    name: String,
    size: usize,
    is_creator: bool,
}

impl SharedRegion {
    /// Create a region of exactly `size` bytes and drop its global name
    /// straight away. Only handles that already map it can reach it.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::create_with(name, size, true)
    }

    /// Like [`SharedRegion::create`] but keeps the name registered so later
    /// processes can [`SharedRegion::open`] it.
    pub fn create_named(name: &str, size: usize) -> Result<Self> {
        Self::create_with(name, size, false)
    }

    fn create_with(name: &str, size: usize, ephemeral: bool) -> Result<Self> {
        if size <= OVERHEAD {
            return Err(Error::InvalidInput(format!(
                "shared region `{name}` needs more than {OVERHEAD} bytes, got {size}"
            )));
        }
        if size - OVERHEAD > MAX_PAYLOAD {
            return Err(Error::InvalidInput(format!(
                "shared region `{name}` of {size} bytes exceeds the u32 length prefix"
            )));
        }
        let inner = PlatformRegion::create(name, size, ephemeral)
            .map_err(|e| Error::system(format!("creating shared region `{name}`"), e))?;
        tracing::debug!(name, size, ephemeral, "shared region created");
        Ok(Self {
            inner: Some(inner),
            name: name.to_owned(),
            size,
            is_creator: true,
        })
    }

    /// Map an existing named region without touching its name.
    pub fn open(name: &str) -> Result<Self> {
        let inner = PlatformRegion::open(name)
            .map_err(|e| Error::system(format!("opening shared region `{name}`"), e))?;
        let size = inner.size();
        if size <= OVERHEAD {
            return Err(Error::system(
                format!("opening shared region `{name}`"),
                io::Error::new(io::ErrorKind::InvalidData, "region too small"),
            ));
        }
        Ok(Self {
            inner: Some(inner),
            name: name.to_owned(),
            size,
            is_creator: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total mapped size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Largest payload that fits: `size - 5`, capped at `u32::MAX`.
    pub fn capacity(&self) -> usize {
        (self.size - OVERHEAD).min(MAX_PAYLOAD)
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn mapping(&self) -> Result<&PlatformRegion> {
        self.inner.as_ref().ok_or_else(|| {
            Error::system(
                format!("shared region `{}`", self.name),
                io::Error::new(io::ErrorKind::NotConnected, "region is closed"),
            )
        })
    }

    /// Store `bytes` while holding `mutex`.
    ///
    /// Payloads longer than [`SharedRegion::capacity`] are truncated to fit.
    /// Returns the number of payload bytes actually stored, so a result
    /// smaller than `bytes.len()` means truncation happened.
    pub fn write_guarded(&self, bytes: &[u8], mutex: &NamedMutex) -> Result<usize> {
        let region = self.mapping()?;
        let _lock = mutex.guard()?;
        let len = bytes.len().min(self.capacity());
        let base = region.as_mut_ptr();
        unsafe {
            ptr::write_unaligned(base as *mut u32, len as u32);
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(LEN_PREFIX), len);
            *base.add(LEN_PREFIX + len) = 0;
        }
        if len < bytes.len() {
            tracing::debug!(
                name = %self.name,
                requested = bytes.len(),
                stored = len,
                "shared region payload truncated"
            );
        }
        Ok(len)
    }

    /// Copy the current payload out while holding `mutex`.
    ///
    /// A length prefix larger than the capacity (written by someone who
    /// ignored the mutex, or garbage) is clamped rather than trusted.
    pub fn read_guarded(&self, mutex: &NamedMutex) -> Result<Vec<u8>> {
        let region = self.mapping()?;
        let _lock = mutex.guard()?;
        let base = region.as_ptr();
        let stored = unsafe { ptr::read_unaligned(base as *const u32) } as usize;
        let len = stored.min(self.capacity());
        let mut out = vec![0u8; len];
        unsafe {
            ptr::copy_nonoverlapping(base.add(LEN_PREFIX), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Unmap. A creator also removes any residual name. Idempotent.
    pub fn close(&mut self) {
        if let Some(region) = self.inner.take() {
            if self.is_creator {
                region.unlink();
            }
            tracing::debug!(name = %self.name, os_name = region.name(), "shared region closed");
            drop(region);
        }
    }

    /// Remove a leftover name (e.g. after a crashed non-ephemeral creator).
    pub fn clear_storage(name: &str) {
        PlatformRegion::unlink_by_name(name);
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        self.close();
    }
}
