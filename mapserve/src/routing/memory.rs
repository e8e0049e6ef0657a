//! Process memory probes and reclamation.

use tracing::info;

/// Resident set size of this process in bytes, where the platform exposes it.
#[cfg(target_os = "linux")]
pub fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // SAFETY: sysconf has no preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(page_size).ok().map(|size| pages * size)
}

#[cfg(not(target_os = "linux"))]
pub fn resident_bytes() -> Option<u64> {
    None
}

/// Returns freed heap pages to the operating system.
pub fn reclaim() {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: malloc_trim only walks allocator state and is thread-safe in glibc.
        unsafe {
            libc::malloc_trim(0);
        }
    }
}

/// Runs [`reclaim`] and logs resident memory before and after.
pub fn reclaim_logged(evicted: usize) {
    let before = resident_bytes();
    reclaim();
    let after = resident_bytes();
    info!(
        evicted,
        before_mb = before.map(|b| b / 1_048_576),
        after_mb = after.map(|b| b / 1_048_576),
        "Reclaimed routing memory"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_resident_bytes_available_on_linux() {
        let rss = resident_bytes().unwrap();
        assert!(rss > 0);
    }

    #[test]
    fn test_reclaim_is_safe_to_call_repeatedly() {
        reclaim();
        reclaim_logged(0);
    }
}
