use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("cpu {cpu} is outside the affinity mask (max {max})")]
    OutOfRange { cpu: usize, max: usize },

    #[error("sched_setaffinity(cpu {cpu}) failed: {source}")]
    Os {
        cpu: usize,
        #[source]
        source: io::Error,
    },

    #[error("thread affinity is not supported on this platform")]
    Unsupported,
}

/// Restrict the calling thread to `cpu`.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> Result<(), AffinityError> {
    let max = 8 * core::mem::size_of::<libc::cpu_set_t>();
    if cpu >= max {
        return Err(AffinityError::OutOfRange { cpu, max });
    }

    // SAFETY: `cpu_set_t` is plain data; an all-zero value is an empty set.
    let mut set: libc::cpu_set_t = unsafe { core::mem::zeroed() };
    // SAFETY: `cpu` is within the set, checked above. Pid 0 is the calling thread.
    let rc = unsafe {
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(AffinityError::Os {
            cpu,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> Result<(), AffinityError> {
    Err(AffinityError::Unsupported)
}

/// CPU the calling thread is running on right now.
#[cfg(target_os = "linux")]
pub fn current_cpu() -> Option<usize> {
    // SAFETY: no preconditions.
    let cpu = unsafe { libc::sched_getcpu() };
    usize::try_from(cpu).ok()
}

#[cfg(not(target_os = "linux"))]
pub fn current_cpu() -> Option<usize> {
    None
}

/// Lock all current and future pages of the process into RAM.
pub fn lock_all_memory() -> io::Result<()> {
    // SAFETY: no pointer arguments.
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
