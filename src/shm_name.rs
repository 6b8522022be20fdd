// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Names for POSIX semaphores and shared memory objects.
// Both namespaces want a single leading '/', and macOS caps them at 31 bytes.

/// FNV-1a 64-bit hash, used to shorten names that exceed the platform cap.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Longest accepted POSIX object name, leading '/' included. 0 = unlimited.
///
/// `PSEMNAMLEN` and `PSHMNAMLEN` are both 31 on macOS.
#[cfg(target_os = "macos")]
pub const NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const NAME_MAX: usize = 0;

/// Normalise a registry resource name for `sem_open` / `shm_open`.
///
/// `"ssp_fmo"` and `"/ssp_fmo"` map to the same object. Over-long names keep
/// a readable prefix and end in `_<16 hex digits>` of their FNV-1a hash, so
/// two long names differing only in the tail still map to distinct objects.
pub fn posix_name(name: &str) -> String {
    let body = name.trim_start_matches('/');
    let full = format!("/{body}");
    if NAME_MAX == 0 || full.len() <= NAME_MAX {
        return full;
    }

    let suffix = format!("_{:016x}", fnv1a_64(full.as_bytes()));
    let keep = NAME_MAX.saturating_sub(suffix.len() + 1);
    let mut cut = keep.min(body.len());
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("/{}{suffix}", &body[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_of_empty_input_is_offset_basis() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
    }

    #[test]
    fn adds_exactly_one_leading_slash() {
        assert_eq!(posix_name("ssp_mutex"), "/ssp_mutex");
        assert_eq!(posix_name("/ssp_mutex"), "/ssp_mutex");
        assert_eq!(posix_name("//ssp_mutex"), "/ssp_mutex");
    }

    #[test]
    fn long_names_stay_within_cap() {
        let long = "x".repeat(200);
        let name = posix_name(&long);
        assert!(name.starts_with('/'));
        if NAME_MAX > 0 {
            assert!(name.len() <= NAME_MAX);
            assert_ne!(posix_name(&format!("{long}a")), posix_name(&format!("{long}b")));
        } else {
            assert_eq!(name.len(), 201);
        }
    }
}
