use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemoryStats {
    pub rss_bytes: u64,
    pub rss_mb: u64,
}

/// Sample this process's resident set size. Returns zeroed stats on platforms
/// without /proc (pacing is then effectively disabled).
pub fn sample() -> MemoryStats {
    let rss_bytes = read_rss_bytes().unwrap_or(0);
    MemoryStats {
        rss_bytes,
        rss_mb: rss_bytes / (1024 * 1024),
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<u64> {
    // /proc/self/statm: size resident shared text lib data dt (pages)
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * page_size())
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    // Kernel default; exactness does not matter for a pacing threshold.
    4096
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes() -> Option<u64> {
    None
}
