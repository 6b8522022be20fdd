// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the registry primitives: a named counting
// semaphore (`sem_open`) and a named shared memory object (`shm_open`).

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::shm_name;

/// S_IRUSR|S_IWUSR|S_IRGRP|S_IWGRP|S_IROTH|S_IWOTH
const PERMS: libc::mode_t = 0o666;

fn c_name(posix_name: &str) -> io::Result<CString> {
    CString::new(posix_name.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn check_name(name: &str) -> io::Result<()> {
    if name.trim_start_matches('/').is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: named POSIX semaphore
// ---------------------------------------------------------------------------

pub struct PlatformSemaphore {
    sem: *mut libc::sem_t,
    name: String, // POSIX name (with leading '/')
}

// Safety: sem_t handles returned by sem_open are usable from any thread.
unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    /// Exclusively create a named semaphore with count `initial`.
    ///
    /// Fails with `EEXIST` (kind `AlreadyExists`) when the name is taken.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        check_name(name)?;
        let posix_name = shm_name::posix_name(name);
        let c_name = c_name(&posix_name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                PERMS as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: posix_name,
        })
    }

    /// Attach to a semaphore another process created.
    pub fn open(name: &str) -> io::Result<Self> {
        check_name(name)?;
        let posix_name = shm_name::posix_name(name);
        let c_name = c_name(&posix_name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            sem,
            name: posix_name,
        })
    }

    /// Block until the count is positive, then decrement it.
    /// Signal interruptions are retried transparently.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// Decrement without blocking. `Ok(false)` when the count is zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    /// Increment the count. Never blocks.
    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the name from the semaphore namespace. Open handles stay valid.
    pub fn unlink(&self) {
        if let Ok(c_name) = c_name(&self.name) {
            unsafe { libc::sem_unlink(c_name.as_ptr()) };
        }
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(c_name) = c_name(&shm_name::posix_name(name)) {
            unsafe { libc::sem_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
    }
}

// ---------------------------------------------------------------------------
// PlatformRegion: POSIX shared memory object
// ---------------------------------------------------------------------------

pub struct PlatformRegion {
    mem: *mut u8,
    size: usize,
    name: String, // POSIX name (with leading '/')
}

// Safety: the mapping is process-shared; callers serialise access externally.
unsafe impl Send for PlatformRegion {}
unsafe impl Sync for PlatformRegion {}

impl PlatformRegion {
    /// Create a fresh object of exactly `size` bytes and map it.
    ///
    /// A stale object left under the same name (a non-ephemeral creator that
    /// crashed) is unlinked and replaced. With `unlink_name` the name is
    /// removed right after sizing, so only existing mappings keep it alive.
    pub fn create(name: &str, size: usize, unlink_name: bool) -> io::Result<Self> {
        check_name(name)?;
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let posix_name = shm_name::posix_name(name);
        let c_name = c_name(&posix_name)?;

        let open_excl = || {
            let fd = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                    PERMS as libc::c_uint,
                )
            };
            if fd == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(fd)
            }
        };

        let fd = match open_excl() {
            Ok(fd) => fd,
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                tracing::debug!(name = %posix_name, "replacing stale shared memory object");
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                open_excl()?
            }
            Err(e) => return Err(e),
        };

        // Ensure permissions regardless of umask.
        unsafe { libc::fchmod(fd, PERMS) };

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        if unlink_name {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }

        Self::map_and_close(fd, size, posix_name)
    }

    /// Map an existing named object. Its size is taken from the object itself.
    pub fn open(name: &str) -> io::Result<Self> {
        check_name(name)?;
        let posix_name = shm_name::posix_name(name);
        let c_name = c_name(&posix_name)?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, PERMS as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let size = st.st_size as usize;
        if size == 0 {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared memory object has not been sized yet",
            ));
        }

        Self::map_and_close(fd, size, posix_name)
    }

    fn map_and_close(fd: i32, size: usize, posix_name: String) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // The mapping keeps the object alive; the descriptor is no longer needed.
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            name: posix_name,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the name (`shm_unlink`). Does NOT release the mapping.
    pub fn unlink(&self) {
        if let Ok(c_name) = c_name(&self.name) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    pub fn unlink_by_name(name: &str) {
        if let Ok(c_name) = c_name(&shm_name::posix_name(name)) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformRegion {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}
