// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the registry primitives: a named kernel
// semaphore and a pagefile-backed named file mapping.
//
// Kernel object names vanish with the last open handle, so the POSIX
// "unlink right after create" step has nothing to do here.

use std::io;
use std::ptr;

/// Encode a name as a null-terminated wide string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn check_name(name: &str) -> io::Result<()> {
    if name.trim_start_matches('/').is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
    }
    Ok(())
}

/// `/ssp_mutex` and `ssp_mutex` refer to the same object, as on POSIX.
fn object_name(name: &str) -> String {
    name.trim_start_matches('/').to_owned()
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: Windows named semaphore
// ---------------------------------------------------------------------------

pub struct PlatformSemaphore {
    handle: windows_sys::Win32::Foundation::HANDLE,
    name: String,
}

unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS};
        use windows_sys::Win32::System::Threading::CreateSemaphoreW;

        check_name(name)?;
        let name = object_name(name);
        let wide_name = to_wide(&name);
        let max = initial.max(1) as i32;
        let handle = unsafe { CreateSemaphoreW(ptr::null(), initial as i32, max, wide_name.as_ptr()) };
        let err = unsafe { GetLastError() };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        if err == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "semaphore already exists",
            ));
        }
        Ok(Self { handle, name })
    }

    pub fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::FALSE;
        use windows_sys::Win32::System::Threading::{OpenSemaphoreW, SEMAPHORE_ALL_ACCESS};

        check_name(name)?;
        let name = object_name(name);
        let wide_name = to_wide(&name);
        let handle = unsafe { OpenSemaphoreW(SEMAPHORE_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle, name })
    }

    pub fn wait(&self) -> io::Result<()> {
        use windows_sys::Win32::Foundation::{WAIT_ABANDONED, WAIT_OBJECT_0};
        use windows_sys::Win32::System::Threading::{WaitForSingleObject, INFINITE};

        match unsafe { WaitForSingleObject(self.handle, INFINITE) } {
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn try_wait(&self) -> io::Result<bool> {
        use windows_sys::Win32::Foundation::{WAIT_OBJECT_0, WAIT_TIMEOUT};
        use windows_sys::Win32::System::Threading::WaitForSingleObject;

        match unsafe { WaitForSingleObject(self.handle, 0) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn post(&self) -> io::Result<()> {
        use windows_sys::Win32::System::Threading::ReleaseSemaphore;

        if unsafe { ReleaseSemaphore(self.handle, 1, ptr::null_mut()) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unlink(&self) {}

    pub fn unlink_by_name(_name: &str) {}
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        if !self.handle.is_null() {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformRegion: Windows shared memory via file mapping
// ---------------------------------------------------------------------------

/// Bytes in front of the caller's block holding its size as a `u64`.
///
/// A view only reports its page-rounded extent, so openers read the
/// creator's size from here.
const SIZE_HEADER: usize = 8;

pub struct PlatformRegion {
    handle: windows_sys::Win32::Foundation::HANDLE,
    view: *mut u8,
    size: usize,
    name: String,
}

unsafe impl Send for PlatformRegion {}
unsafe impl Sync for PlatformRegion {}

impl PlatformRegion {
    /// Create a mapping for `size` caller bytes. Fails with `AlreadyExists`
    /// while another handle keeps a mapping of that name alive.
    pub fn create(name: &str, size: usize, _unlink_name: bool) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, INVALID_HANDLE_VALUE};
        use windows_sys::Win32::System::Memory::{CreateFileMappingW, PAGE_READWRITE, SEC_COMMIT};

        check_name(name)?;
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let total = size
            .checked_add(SIZE_HEADER)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "size too large"))? as u64;
        let name = object_name(name);
        let wide_name = to_wide(&name);
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE | SEC_COMMIT,
                (total >> 32) as u32,
                total as u32,
                wide_name.as_ptr(),
            )
        };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("file mapping `{name}` already exists"),
            ));
        }

        let mut region = Self::map(handle, name)?;
        unsafe { ptr::write_unaligned(region.view as *mut u64, size as u64) };
        region.size = size;
        Ok(region)
    }

    pub fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::FALSE;
        use windows_sys::Win32::System::Memory::{OpenFileMappingW, FILE_MAP_ALL_ACCESS};

        check_name(name)?;
        let name = object_name(name);
        let wide_name = to_wide(&name);
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let mut region = Self::map(handle, name)?;
        let extent = region.view_extent()?;
        let stored = unsafe { ptr::read_unaligned(region.view as *const u64) };
        let size = usize::try_from(stored).unwrap_or(usize::MAX);
        if size == 0 || size > extent.saturating_sub(SIZE_HEADER) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file mapping carries no valid size header",
            ));
        }
        region.size = size;
        Ok(region)
    }

    /// Map the whole section. The size is filled in by the caller.
    fn map(handle: windows_sys::Win32::Foundation::HANDLE, name: String) -> io::Result<Self> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::{MapViewOfFile, FILE_MAP_ALL_ACCESS};

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        if view.Value.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(e);
        }
        Ok(Self {
            handle,
            view: view.Value as *mut u8,
            size: 0,
            name,
        })
    }

    /// Page-rounded extent of the mapped view.
    fn view_extent(&self) -> io::Result<usize> {
        use windows_sys::Win32::System::Memory::{VirtualQuery, MEMORY_BASIC_INFORMATION};

        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            VirtualQuery(
                self.view as *const _,
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if ret == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(info.RegionSize)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.as_mut_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        unsafe { self.view.add(SIZE_HEADER) }
    }

    /// Caller-visible size, excluding the size header.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unlink(&self) {}

    pub fn unlink_by_name(_name: &str) {}
}

impl Drop for PlatformRegion {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::{UnmapViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS};

        if !self.view.is_null() {
            unsafe {
                UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.view as *mut _,
                })
            };
        }
        if !self.handle.is_null() {
            unsafe { CloseHandle(self.handle) };
        }
    }
}
