/// Worker thread count for the tokio runtime.
///
/// Detection order:
/// 1. `NUM_WORKERS` env var (explicit operator override)
/// 2. cgroup v2: `/sys/fs/cgroup/cpu.max`
/// 3. cgroup v1: `/sys/fs/cgroup/cpu/cpu.cfs_quota_us` + `cpu.cfs_period_us`
/// 4. Fallback: `std::thread::available_parallelism()` (host CPU count)
///
/// Without this, tokio defaults to host CPU count, which over-provisions
/// threads when a container is limited to e.g. 4 cores on a 64-core host.
pub fn worker_thread_count() -> usize {
    // 1. Explicit env var
    if let Ok(workers) = std::env::var("NUM_WORKERS") {
        if let Ok(n) = workers.trim().parse::<usize>() {
            let threads = n.max(1);
            eprintln!("[runtime] Using NUM_WORKERS: {} threads", threads);
            return threads;
        }
    }

    // 2. cgroup v2 (unified hierarchy)
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cgroup_v2_cpu(&max) {
            let threads = cores.max(1);
            eprintln!(
                "[runtime] Using CPU limit from cgroup v2: {} threads",
                threads
            );
            return threads;
        }
    }

    // 3. cgroup v1 (legacy hierarchy)
    if let (Ok(quota), Ok(period)) = (
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us"),
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us"),
    ) {
        if let Some(cores) = parse_cgroup_v1_cpu(&quota, &period) {
            let threads = cores.max(1);
            eprintln!(
                "[runtime] Using CPU limit from cgroup v1: {} threads",
                threads
            );
            return threads;
        }
    }

    // 4. Fallback: host CPU count
    let threads = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    eprintln!("[runtime] Using system CPU count: {} threads", threads);
    threads
}

/// Parse cgroup v2 `cpu.max` — format: "quota period" or "max period".
fn parse_cgroup_v2_cpu(content: &str) -> Option<usize> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() >= 2 {
        if parts[0] == "max" {
            return None; // unlimited
        }
        let quota: i64 = parts[0].parse().ok()?;
        let period: i64 = parts[1].parse().ok()?;
        if quota > 0 && period > 0 {
            return Some((quota / period) as usize);
        }
    }
    None
}

/// Parse cgroup v1 `cpu.cfs_quota_us` / `cpu.cfs_period_us`.
fn parse_cgroup_v1_cpu(quota: &str, period: &str) -> Option<usize> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period: i64 = period.trim().parse().ok()?;
    if quota > 0 && period > 0 {
        Some((quota / period) as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cgroup_v2_cpu() {
        assert_eq!(parse_cgroup_v2_cpu("400000 100000"), Some(4));
        assert_eq!(parse_cgroup_v2_cpu("200000 100000"), Some(2));
        assert_eq!(parse_cgroup_v2_cpu("max 100000"), None);
        assert_eq!(parse_cgroup_v2_cpu(""), None);
    }

    #[test]
    fn test_parse_cgroup_v1_cpu() {
        assert_eq!(parse_cgroup_v1_cpu("400000", "100000"), Some(4));
        assert_eq!(parse_cgroup_v1_cpu("-1", "100000"), None);
        assert_eq!(parse_cgroup_v1_cpu("0", "100000"), None);
    }
}
