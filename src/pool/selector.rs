use crate::store::PoolEntry;
use rand::Rng;

/// Pick the best upstream for `host` from a fresh snapshot of the pool.
///
/// Policy:
/// 1. Candidates are entries never used with `host` or whose last attempt
///    for `host` succeeded.
/// 2. Among candidates never used with `host`, one is chosen uniformly at
///    random, spreading first use across the pool.
/// 3. Otherwise the candidate least recently used for `host` wins, giving
///    maximum rotation per destination.
///
/// Global `alive` is not a filter here; only a per-host dispatch failure
/// excludes an entry. `host` must already be case-folded.
///
/// Pure read over the snapshot — no mutation, no suspension.
pub fn select<'a>(entries: &'a [PoolEntry], host: &str) -> Option<&'a PoolEntry> {
    let candidates: Vec<&PoolEntry> = entries
        .iter()
        .filter(|e| e.is_candidate_for(host))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let unused: Vec<&PoolEntry> = candidates
        .iter()
        .copied()
        .filter(|e| e.host_record(host).is_none())
        .collect();
    if !unused.is_empty() {
        let idx = rand::thread_rng().gen_range(0..unused.len());
        return Some(unused[idx]);
    }

    candidates.into_iter().min_by(|a, b| {
        let at = last_usage_key(a, host);
        let bt = last_usage_key(b, host);
        at.partial_cmp(&bt).unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Sort key for the least-recently-used pass. A record without a usage
/// timestamp (failed once, then recovered by probe, never dispatched)
/// sorts last among used candidates.
fn last_usage_key(entry: &PoolEntry, host: &str) -> f64 {
    entry
        .host_record(host)
        .and_then(|r| r.last_usage)
        .unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(url: &str) -> PoolEntry {
        PoolEntry::new(url, 0)
    }

    #[test]
    fn test_empty_pool_selects_none() {
        assert!(select(&[], "x.test").is_none());
    }

    #[test]
    fn test_dead_for_host_is_never_selected() {
        let mut a = entry("http://a:3128/");
        a.record_failure("x.test");
        let entries = vec![a];

        for _ in 0..50 {
            assert!(select(&entries, "x.test").is_none());
        }
    }

    #[test]
    fn test_dead_for_one_host_stays_usable_for_others() {
        let mut a = entry("http://a:3128/");
        a.record_failure("x.test");
        let entries = vec![a];

        assert_eq!(select(&entries, "y.test").unwrap().url, "http://a:3128/");
    }

    #[test]
    fn test_globally_dead_entry_remains_a_candidate() {
        let mut a = entry("http://a:3128/");
        a.alive = false;
        let entries = vec![a];

        assert!(select(&entries, "x.test").is_some());
    }

    #[test]
    fn test_unused_preferred_over_used() {
        let mut a = entry("http://a:3128/");
        a.record_success("x.test", 1.0);
        let b = entry("http://b:3128/");
        let entries = vec![a, b];

        for _ in 0..50 {
            assert_eq!(select(&entries, "x.test").unwrap().url, "http://b:3128/");
        }
    }

    #[test]
    fn test_least_recently_used_wins_after_exhaustion() {
        let mut a = entry("http://a:3128/");
        a.record_success("x.test", 1.0);
        let mut b = entry("http://b:3128/");
        b.record_success("x.test", 2.0);
        let entries = vec![a, b];

        assert_eq!(select(&entries, "x.test").unwrap().url, "http://a:3128/");
    }

    #[test]
    fn test_recovered_record_without_usage_sorts_last() {
        let mut a = entry("http://a:3128/");
        a.record_success("x.test", 5.0);
        let mut b = entry("http://b:3128/");
        b.record_failure("x.test");
        b.mark_host_alive("x.test");
        let entries = vec![a, b];

        assert_eq!(select(&entries, "x.test").unwrap().url, "http://a:3128/");
    }

    /// First-use diversity: with three never-used upstreams and every
    /// dispatch succeeding, each must take a healthy share of 300 rounds.
    #[test]
    fn test_first_use_diversity_over_300_dispatches() {
        let mut entries = vec![
            entry("http://a:3128/"),
            entry("http://b:3128/"),
            entry("http://c:3128/"),
        ];

        let mut counts: HashMap<String, usize> = HashMap::new();
        for round in 0..300 {
            let url = select(&entries, "x.test").unwrap().url.clone();
            *counts.entry(url.clone()).or_insert(0) += 1;
            let chosen = entries.iter_mut().find(|e| e.url == url).unwrap();
            chosen.record_success("x.test", round as f64);
        }

        for url in ["http://a:3128/", "http://b:3128/", "http://c:3128/"] {
            let count = *counts.get(url).unwrap_or(&0);
            assert!(count >= 60, "{} chosen only {} times", url, count);
        }
    }
}
