//! # CPU affinity
//!
//! Grounded on the absence of a dedicated affinity module in the source —
//! core pinning there is folded into `MultiCoreRealtimeKernel`'s taskset/
//! cgroups split (`src/MultiCoreRealtimeKernel.cpp`). Pinning a specific OS
//! thread to a specific core is itself the `TASKSET`-adjacent mechanism: it
//! lets a [`crate::coordinator::MultiCoreCoordinator`] bind each per-core
//! thread without shelling out to the `taskset` command.

use tracing::{info, warn};

use crate::error::Result;

/// Bind the calling thread to `core_id`. On non-Linux targets this is a
/// logged no-op — there is no portable syscall for it, and the source
/// itself only ever targeted Linux for this mechanism.
#[cfg(target_os = "linux")]
pub fn set_sched_affinity(core_id: usize) -> Result<()> {
    use crate::error::SchedError;

    // SAFETY: `set` and `cpuset` are stack-local and initialized by the
    // libc macros below before any syscall reads them.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(SchedError::Affinity {
                core: core_id,
                source: std::io::Error::last_os_error(),
            });
        }
    }
    info!(core = core_id, "bound thread to core");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_sched_affinity(core_id: usize) -> Result<()> {
    warn!(
        core = core_id,
        "CPU affinity is not implemented on this platform; continuing unpinned"
    );
    Ok(())
}
