//! Process memory helpers used to check that maps release what they load.

use cfg_if::cfg_if;

use crate::error::CartographError;

cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Resident set size of the current process in bytes.
        pub fn resident_memory() -> Result<u64, CartographError> {
            let statm = std::fs::read_to_string("/proc/self/statm")?;
            let pages: u64 = statm
                .split_whitespace()
                .nth(1)
                .and_then(|value| value.parse().ok())
                .ok_or_else(|| {
                    CartographError::Configuration(format!("unexpected statm content: {statm}"))
                })?;

            // SAFETY: sysconf has no preconditions.
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            let page_size = u64::try_from(page_size).map_err(|_| {
                CartographError::Configuration("failed to query page size".into())
            })?;

            Ok(pages * page_size)
        }
    } else {
        /// Resident set size of the current process in bytes. Only available on Linux.
        pub fn resident_memory() -> Result<u64, CartographError> {
            Err(CartographError::Configuration(
                "resident memory can only be queried on Linux".into(),
            ))
        }
    }
}

cfg_if! {
    if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
        /// Asks the allocator to return free memory to the system.
        pub fn trim_allocator() {
            // SAFETY: malloc_trim only releases unused heap memory.
            let released = unsafe { libc::malloc_trim(0) };
            log::trace!("malloc_trim released memory: {}", released != 0);
        }
    } else {
        /// Asks the allocator to return free memory to the system. Does nothing on this platform.
        pub fn trim_allocator() {}
    }
}
