//! Resident-memory sampling and release for the back-pressure governor.

/// Current resident set size in MB, read from `/proc/self/status` (VmRSS is
/// the physical memory actually in use).
#[cfg(target_os = "linux")]
pub fn current_rss_mb() -> f64 {
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                if let Some(kb) = rest
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse::<f64>().ok())
                {
                    return kb / 1024.0;
                }
            }
        }
    }
    0.0
}

#[cfg(not(target_os = "linux"))]
pub fn current_rss_mb() -> f64 {
    0.0
}

/// Ask the allocator to hand unused pages back to the OS. malloc_trim is the
/// closest thing to a GC hint a glibc process has.
#[cfg(target_os = "linux")]
pub fn release_unused() {
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn release_unused() {}

pub fn usage_percent(current_mb: f64, limit_mb: u64) -> f64 {
    if limit_mb == 0 {
        return 0.0;
    }
    current_mb / limit_mb as f64 * 100.0
}
