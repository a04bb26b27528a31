//! Signal masking for worker-style threads.
//!
//! Per the concurrency model, only the main/accept thread is allowed to
//! observe process signals (SIGINT/SIGTERM trigger cooperative shutdown
//! there via `signal-hook`). Pool workers and the cache evictor block every
//! signal immediately after spawning so a stray delivery never interrupts a
//! blocking read/write mid-task.

/// Blocks all signals for the calling thread. Best-effort: a failure here is
/// logged but never fatal, since worker threads should still make progress
/// even on a platform where this call is unsupported.
pub fn block_all_signals() {
    unsafe {
        let mut mask: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut mask);
        let rc = libc::pthread_sigmask(libc::SIG_SETMASK, &mask, std::ptr::null_mut());
        if rc != 0 {
            log::warn!("failed to block signals on worker thread (errno {rc})");
        }
    }
}
