//! Open file limit.
//!
//! Every held connection is a descriptor, so the default soft limit (often
//! 1024) is easily exhausted.

use std::io::Error;

/// Raises the soft `RLIMIT_NOFILE` limit up to the hard one.
///
/// Returns the resulting soft limit.
#[cfg(unix)]
pub fn raise_nofile() -> Result<u64, Error> {
    let mut lim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
        return Err(Error::last_os_error());
    }

    if lim.rlim_cur < lim.rlim_max {
        let prev = lim.rlim_cur;
        lim.rlim_cur = lim.rlim_max;
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
            return Err(Error::last_os_error());
        }
        log::debug!("raised open file limit from {prev} to {}", lim.rlim_cur);
    }

    Ok(lim.rlim_cur as u64)
}

/// Windows has no descriptor rlimit, handles are limited by the system.
#[cfg(windows)]
pub fn raise_nofile() -> Result<u64, Error> {
    Ok(u64::MAX)
}
